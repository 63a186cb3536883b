//! Pipeline configuration.
//!
//! Settings are grouped by concern and persisted as JSON. Loading falls back
//! to defaults field by field: every struct and field carries a serde
//! default, so a config file only needs the values it wants to override, and
//! unknown or missing entries never abort a run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bounds of the synthetic-tracking sweep grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepBounds {
    /// Motion to start the sweep at, arcsec/min.
    pub motion_min: f64,
    /// Motion to end the sweep at, arcsec/min.
    pub motion_max: f64,
    /// Position angle to start each motion row at, degrees.
    pub pa_min_deg: f64,
    /// Position angle to end each motion row at, degrees.
    pub pa_max_deg: f64,
}

impl Default for SweepBounds {
    fn default() -> Self {
        Self {
            motion_min: 0.25,
            motion_max: 9.0,
            pa_min_deg: 0.0,
            pa_max_deg: 360.0,
        }
    }
}

/// Object detection and tracklet tolerance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Aperture radius in pixels.
    pub aperture_radius: i32,
    /// Sigmas above background for the detection threshold.
    pub sigma_detect: f64,
    /// Sigmas above background for the star-mask threshold.
    pub sigma_star_mask: f64,
    /// Base minimum of threshold-exceeding pixels, before the track-length
    /// allowance.
    pub threshold_pix_base: usize,
    /// Permitted stack-and-track error, pixels.
    pub track_error_px: f64,
    /// Permitted object position error, pixels.
    pub position_error_px: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            aperture_radius: 5,
            sigma_detect: 1.9,
            sigma_star_mask: 3.0,
            threshold_pix_base: 4,
            track_error_px: 0.5,
            position_error_px: 1.5,
        }
    }
}

/// Frame preparation and display-stretch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// Sigmas below background for the raw-frame black level and the
    /// histogram low-tail clip.
    pub black_fits_sigmas: f64,
    /// Sigmas above background for the raw-frame white level.
    pub white_fits_sigmas: f64,
    /// Sigmas below background for the stacked-image black level.
    pub black_hist_sigmas: f64,
    /// Sigmas above background for the stacked-image white level.
    pub white_hist_sigmas: f64,
    /// Apply the 3x3 Gaussian blur during preparation.
    pub blur: bool,
    /// Apply per-column de-lining during preparation.
    pub deline: bool,
    /// Synthesize and divide by a flat field.
    pub flatten: bool,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            black_fits_sigmas: 4.5,
            white_fits_sigmas: 7.5,
            black_hist_sigmas: 3.0,
            white_hist_sigmas: 9.0,
            blur: true,
            deline: false,
            flatten: false,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sweep: SweepBounds,
    pub detection: DetectionSettings,
    pub frames: FrameSettings,
    /// Directory the mover log is written into; none disables the log.
    pub log_directory: Option<PathBuf>,
    /// Filename marker that starts a new image group.
    pub group_marker: String,
}

impl PipelineConfig {
    /// Load configuration from a JSON file, falling back to defaults.
    ///
    /// A missing or unreadable file, or one that fails to parse, yields the
    /// default configuration with a warning; fields absent from the file take
    /// their defaults individually.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!("config {} not readable ({err}), using defaults", path.display());
                return Self::normalized_default();
            }
        };
        match serde_json::from_str::<PipelineConfig>(&text) {
            Ok(config) => config.normalized(),
            Err(err) => {
                warn!("config {} invalid ({err}), using defaults", path.display());
                Self::normalized_default()
            }
        }
    }

    /// Persist the configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(self).expect("config serializes");
        fs::write(path, text)
    }

    fn normalized_default() -> Self {
        Self::default().normalized()
    }

    /// Fill in values serde defaults leave empty.
    fn normalized(mut self) -> Self {
        if self.group_marker.is_empty() {
            self.group_marker = "_0_".to_string();
        }
        self
    }
}
