//! Mover log output.
//!
//! One tab-separated record per mover: run prefix, sequence number, the
//! three detections' positions and photometry, then the track solution and
//! review status. Records flow over a bounded channel to a writer thread so
//! the caller never blocks on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use tracing::{info, warn};

use crate::mover::Mover;

const HEADER: &str = "Log\t\tSeq\tx1\ty1\tpix1\ttCnt1\tsnr1\tflx1\t\
    x2\ty2\tpix2\ttCnt2\tsnr2\tflx2\t\
    x3\ty3\tpix3\ttCnt3\tsnr3\tflx3\t\
    motion\tPA\terrMid\tscore\tstatus\n";

/// Buffered capacity of the record channel.
const QUEUE_DEPTH: usize = 64;

/// Asynchronous writer for the mover log.
pub struct MoverLog {
    sender: Sender<String>,
    worker: Option<JoinHandle<()>>,
    prefix: String,
    path: PathBuf,
}

impl MoverLog {
    /// Create `<prefix>-log.txt` in `directory` (the prefix is the run's
    /// UTC epoch timestamp), write the header, and start the writer thread.
    pub fn create(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("creating log directory {}", directory.display()))?;

        let prefix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs()
            .to_string();
        let path = directory.join(format!("{prefix}-log.txt"));
        let mut out = BufWriter::new(
            File::create(&path).with_context(|| format!("creating log {}", path.display()))?,
        );
        out.write_all(HEADER.as_bytes())
            .context("writing log header")?;

        let (sender, receiver) = bounded::<String>(QUEUE_DEPTH);
        let worker_path = path.clone();
        let worker = std::thread::spawn(move || {
            while let Ok(record) = receiver.recv() {
                if let Err(err) = out.write_all(record.as_bytes()) {
                    warn!("log write to {} failed: {err}", worker_path.display());
                }
            }
            if let Err(err) = out.flush() {
                warn!("log flush of {} failed: {err}", worker_path.display());
            }
        });

        Ok(MoverLog {
            sender,
            worker: Some(worker),
            prefix,
            path,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue records for the given movers, in list order.
    pub fn record_movers(&self, movers: &[Mover]) -> Result<()> {
        for (sequence, mover) in movers.iter().enumerate() {
            self.sender
                .send(format_record(&self.prefix, sequence, mover))
                .context("mover log writer has shut down")?;
        }
        Ok(())
    }

    /// Drain the queue and close the file.
    pub fn finish(mut self) {
        mem::drop(self.sender);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("mover log writer panicked");
            }
        }
        info!("mover log written to {}", self.path.display());
    }
}

/// One tab-separated log record.
fn format_record(prefix: &str, sequence: usize, mover: &Mover) -> String {
    let mut record = format!("{prefix}\t{sequence}\t");
    for object in &mover.objects {
        record.push_str(&format!(
            "{:.0}\t{:.0}\t{}\t{}\t{:.3}\t{:.3}\t",
            object.location.x,
            object.location.y,
            object.ob_size,
            object.threshold_count,
            object.snr,
            object.flux,
        ));
    }
    record.push_str(&format!(
        "{:.3}\t{:.3}\t{:.3}\t{:.3}\t{}\n",
        mover.motion,
        mover.pa.to_degrees(),
        mover.err_mid,
        mover.score,
        mover.vetted,
    ));
    record
}
