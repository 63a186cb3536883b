//! FITS ingestion: read frames, validate WCS, assemble image groups.
//!
//! Files are taken in observation order. A filename carrying the group
//! marker starts a new group, mirroring how capture sessions name the first
//! exposure of each pointing. Timestamps come from a `JD` keyword when one
//! exists, else from `DATE-OBS`. Frames missing required keywords are
//! skipped with a warning; file-level read failures abort the run. Pixel
//! loading fans out over a rayon pool since the pipeline proper has not
//! started yet.

use std::path::{Path, PathBuf};

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{info, warn};

use imaging::sky::ARCSEC_PER_RADIAN;
use imaging::{Frame, FrameMeta, PixelPos, SkyCoord};

use crate::error::PipelineError;
use crate::group::ImageGroup;
use crate::scheduler::GROUP_COUNT;

/// The frames of a run, grouped, plus the shared image scale.
#[derive(Debug)]
pub struct LoadedRun {
    pub groups: Vec<ImageGroup>,
    /// Image scale from the first frame, arcsec per pixel.
    pub arcsec_per_pixel: f64,
}

/// Load the given FITS files into exactly three image groups.
pub fn load_groups(paths: &[PathBuf], group_marker: &str) -> Result<LoadedRun, PipelineError> {
    let partitions = partition_paths(paths, group_marker)?;
    if partitions.len() != GROUP_COUNT {
        return Err(PipelineError::GroupCount {
            expected: GROUP_COUNT,
            found: partitions.len(),
        });
    }

    // Flatten for the parallel read, keeping each file's group index.
    let indexed: Vec<(usize, &PathBuf)> = partitions
        .iter()
        .enumerate()
        .flat_map(|(g, files)| files.iter().map(move |p| (g, p)))
        .collect();
    let loaded: Vec<(usize, &PathBuf, Result<Frame, PipelineError>)> = indexed
        .par_iter()
        .map(|&(g, path)| (g, path, load_frame(path)))
        .collect();

    let mut groups: Vec<ImageGroup> = (0..GROUP_COUNT).map(ImageGroup::new).collect();
    let mut run_dims: Option<(usize, usize)> = None;

    for (g, path, result) in loaded {
        let frame = match result {
            Ok(frame) => frame,
            Err(
                err @ (PipelineError::MissingKeyword { .. }
                | PipelineError::InvalidTimestamp { .. }
                | PipelineError::NotAnImage { .. }),
            ) => {
                warn!("skipping {}: {err}", path.display());
                continue;
            }
            Err(err) => return Err(err),
        };

        let dims = (frame.width, frame.height);
        match run_dims {
            None => run_dims = Some(dims),
            Some(expected) if expected != dims => {
                return Err(PipelineError::DimensionMismatch {
                    path: path.clone(),
                    expected_w: expected.0,
                    expected_h: expected.1,
                    got_w: dims.0,
                    got_h: dims.1,
                });
            }
            Some(_) => {}
        }
        groups[g].add_frame(frame);
    }

    for group in groups.iter_mut() {
        if group.frames.is_empty() {
            return Err(PipelineError::EmptyGroup { index: group.index });
        }
        group.set_reference_time();
    }

    let first = &groups[0].frames[0];
    let arcsec_per_pixel = first.meta.scale_y.abs() * ARCSEC_PER_RADIAN;
    info!(
        "loaded {} frames in {} groups, scale {:.3} arcsec/px",
        groups.iter().map(|g| g.frames.len()).sum::<usize>(),
        groups.len(),
        arcsec_per_pixel
    );

    Ok(LoadedRun {
        groups,
        arcsec_per_pixel,
    })
}

/// Split the ordered file list into groups at every marker file.
fn partition_paths(
    paths: &[PathBuf],
    group_marker: &str,
) -> Result<Vec<Vec<PathBuf>>, PipelineError> {
    let mut partitions: Vec<Vec<PathBuf>> = Vec::new();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains(group_marker) {
            partitions.push(Vec::new());
        }
        match partitions.last_mut() {
            Some(group) => group.push(path.clone()),
            None => {
                return Err(PipelineError::NoLeadingGroup {
                    path: path.clone(),
                    marker: group_marker.to_string(),
                });
            }
        }
    }
    if partitions.is_empty() {
        return Err(PipelineError::GroupCount {
            expected: GROUP_COUNT,
            found: 0,
        });
    }
    Ok(partitions)
}

/// Read one FITS file into a frame.
///
/// cfitsio applies BZERO/BSCALE while reading, so pixels arrive on the
/// 0..65535 scale already; they are clamped to that range for the histogram.
fn load_frame(path: &Path) -> Result<Frame, PipelineError> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.primary_hdu()?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => shape.clone(),
        _ => {
            return Err(PipelineError::NotAnImage {
                path: path.to_path_buf(),
            })
        }
    };
    let (height, width) = (shape[0], shape[1]);

    let exposure_s = read_required(&hdu, &mut fptr, path, "EXPTIME")?;
    let jd = read_julian_day(&hdu, &mut fptr, path)?;
    let crval1: f64 = read_required(&hdu, &mut fptr, path, "CRVAL1")?;
    let crval2: f64 = read_required(&hdu, &mut fptr, path, "CRVAL2")?;
    let cdelt1: f64 = read_required(&hdu, &mut fptr, path, "CDELT1")?;
    let cdelt2: f64 = read_required(&hdu, &mut fptr, path, "CDELT2")?;
    let crota2: f64 = hdu.read_key(&mut fptr, "CROTA2").unwrap_or(0.0);
    let crpix1: f64 = hdu
        .read_key(&mut fptr, "CRPIX1")
        .unwrap_or(width as f64 / 2.0);
    let crpix2: f64 = hdu
        .read_key(&mut fptr, "CRPIX2")
        .unwrap_or(height as f64 / 2.0);

    let data: Vec<f32> = hdu.read_image(&mut fptr)?;
    assert_eq!(
        data.len(),
        width * height,
        "pixel count does not match header dimensions"
    );
    // Non-finite pixels (blank values in float FITS) become zero so the
    // histogram and median sorts never see a NaN.
    let pixels = Array2::from_shape_vec((height, width), data)
        .expect("shape checked against data length")
        .mapv(|v| if v.is_finite() { v.clamp(0.0, 65535.0) } else { 0.0 });

    let dec = crval2.to_radians();
    let meta = FrameMeta {
        exposure_s,
        jd,
        ref_coord: SkyCoord::new(crval1.to_radians(), dec),
        ref_pixel: PixelPos::new(crpix1 as i32, crpix2 as i32),
        // CDELT1 over cos(Dec) gives the true angular scale of RA away from
        // the celestial equator.
        scale_x: cdelt1.to_radians() / dec.cos(),
        scale_y: cdelt2.to_radians(),
        // CROTA2 is measured against the sense the stacking offsets rotate
        // in, so its sign flips here.
        rotation: -crota2.to_radians(),
    };
    Ok(Frame::from_pixels(pixels, meta))
}

/// Read a keyword the frame cannot be used without.
fn read_required(
    hdu: &fitsio::hdu::FitsHdu,
    fptr: &mut FitsFile,
    path: &Path,
    keyword: &'static str,
) -> Result<f64, PipelineError> {
    hdu.read_key(fptr, keyword)
        .map_err(|_| PipelineError::MissingKeyword {
            path: path.to_path_buf(),
            keyword,
        })
}

/// Exposure start as a Julian day: the `JD` keyword when present, otherwise
/// derived from `DATE-OBS`.
fn read_julian_day(
    hdu: &fitsio::hdu::FitsHdu,
    fptr: &mut FitsFile,
    path: &Path,
) -> Result<f64, PipelineError> {
    if let Ok(jd) = hdu.read_key::<f64>(fptr, "JD") {
        return Ok(jd);
    }
    let date_obs: String =
        hdu.read_key(fptr, "DATE-OBS")
            .map_err(|_| PipelineError::MissingKeyword {
                path: path.to_path_buf(),
                keyword: "DATE-OBS",
            })?;
    julian_from_date_obs(&date_obs).ok_or_else(|| PipelineError::InvalidTimestamp {
        path: path.to_path_buf(),
        value: date_obs,
    })
}

/// Convert a FITS `DATE-OBS` value (`YYYY-MM-DDThh:mm:ss`, quotes, space
/// separator and fractional seconds tolerated) to a Julian day.
fn julian_from_date_obs(value: &str) -> Option<f64> {
    let value = value.trim().trim_matches('\'').trim();
    let (date, time) = match value.split_once(|c: char| c == 'T' || c == ' ') {
        Some((date, time)) => (date, Some(time)),
        None => (value, None),
    };

    let mut fields = date.splitn(3, '-');
    let year: i32 = fields.next()?.parse().ok()?;
    let month: i32 = fields.next()?.parse().ok()?;
    let day: i32 = fields.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let fraction = match time {
        Some(time) => {
            let mut fields = time.trim_end_matches('Z').splitn(3, ':');
            let hour: f64 = fields.next()?.parse().ok()?;
            let minute: f64 = fields.next().unwrap_or("0").parse().ok()?;
            let second: f64 = fields.next().unwrap_or("0").parse().ok()?;
            hour / 24.0 + minute / 1440.0 + second / 86_400.0
        }
        None => 0.0,
    };

    Some(julian_day(year, month, day) + fraction)
}

/// Julian day at 0h UT of the given Gregorian calendar date.
fn julian_day(year: i32, month: i32, day: i32) -> f64 {
    // Gregorian calendar changeover, encoded as day + 31 * (month + 12 * year).
    const CHANGEOVER: i32 = 15 + 31 * (10 + 12 * 1582);

    let mut jy = year;
    if jy < 0 {
        jy += 1;
    }
    let jm = if month > 2 {
        month + 1
    } else {
        jy -= 1;
        month + 13
    };
    let mut julian =
        (365.25 * jy as f64).floor() + (30.6001 * jm as f64).floor() + day as f64 + 1_720_995.0;
    if day + 31 * (month + 12 * year) >= CHANGEOVER {
        let ja = (0.01 * jy as f64) as i32;
        julian += (2 - ja + (0.25 * ja as f64) as i32) as f64;
    }
    julian - 0.5
}
