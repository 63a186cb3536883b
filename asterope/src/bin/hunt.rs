//! Headless mover hunt over a set of FITS files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use asterope::{loader, scheduler, MoverLog, PipelineConfig, RunControl};

/// Search FITS image groups for faint moving objects by synthetic tracking.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// FITS files in observation order; group-marker filenames start groups
    #[arg(required = true)]
    fits: Vec<PathBuf>,

    /// Configuration file (JSON); missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the mover log (overrides the configured one)
    #[arg(short, long)]
    log_dir: Option<PathBuf>,

    /// Maximum movers to print in the summary
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::load(&PathBuf::from("asterope.json")),
    };
    if let Some(dir) = &args.log_dir {
        config.log_directory = Some(dir.clone());
    }

    let run = loader::load_groups(&args.fits, &config.group_marker)
        .context("loading FITS groups")?;

    let control = RunControl::new();
    let outcome = scheduler::run(&config, run.groups, run.arcsec_per_pixel, &control)
        .context("running detection pipeline")?;

    if let Some(directory) = &config.log_directory {
        let log = MoverLog::create(directory).context("opening mover log")?;
        log.record_movers(outcome.movers.movers())
            .context("recording movers")?;
        log.finish();
    }

    println!(
        "{} sweep steps, {} movers",
        outcome.steps,
        outcome.movers.len()
    );
    for (rank, mover) in outcome.movers.movers().iter().take(args.top).enumerate() {
        println!(
            "#{:<3} ({:6.1}, {:6.1})  motion {:5.2}\"/min  pa {:6.1}  errMid {:4.2}px  score {:8.2}",
            rank + 1,
            mover.objects[0].location.x,
            mover.objects[0].location.y,
            mover.motion,
            mover.pa.to_degrees(),
            mover.err_mid,
            mover.score,
        );
    }

    Ok(())
}
