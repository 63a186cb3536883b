//! Shared builders for synthetic end-to-end runs.
//!
//! Frames are generated on the raw scale the loader would deliver, with
//! identical WCS references so static offsets are zero and geometry is
//! driven purely by the injected targets.

use asterope::{ImageGroup, PipelineConfig};
use imaging::sky::ARCSEC_PER_RADIAN;
use imaging::test_patterns::{synthetic_frame, BlobSpec, SyntheticFrameConfig};
use imaging::{Frame, FrameMeta, PixelPos, SkyCoord, MINUTES_PER_DAY};

/// Run epoch used by all synthetic tests.
pub const EPOCH_JD: f64 = 2_460_000.0;

/// A synthetic moving object.
///
/// `x0`/`y0` is the position at the run epoch. The position drifts against
/// the (motion, pa) track direction, matching the convention the tracked
/// stacking offsets are built with, so a sweep over the true (motion, pa)
/// accumulates the object.
#[derive(Debug, Clone, Copy)]
pub struct MovingTarget {
    pub x0: f64,
    pub y0: f64,
    pub peak: f64,
    pub fwhm: f64,
    /// True motion, arcsec/min.
    pub motion: f64,
    /// True position angle, radians.
    pub pa: f64,
}

impl MovingTarget {
    /// Pixel position `minutes` after the run epoch.
    pub fn position_at(&self, minutes: f64, arcsec_per_pixel: f64) -> (f64, f64) {
        let dist = minutes * self.motion / arcsec_per_pixel;
        (
            self.x0 - dist * self.pa.sin(),
            self.y0 - dist * self.pa.cos(),
        )
    }
}

/// Field geometry shared by every frame of a synthetic run.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub width: usize,
    pub height: usize,
    pub background: f64,
    pub noise_sigma: f64,
    pub exposure_s: f64,
    pub arcsec_per_pixel: f64,
}

impl Default for FieldSpec {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            background: 0.1,
            noise_sigma: 0.01,
            exposure_s: 60.0,
            arcsec_per_pixel: 1.0,
        }
    }
}

/// Build three groups of frames, group starts spaced `group_spacing_min`
/// apart, containing the given moving targets and static stars.
pub fn build_groups(
    field: &FieldSpec,
    targets: &[MovingTarget],
    stars: &[BlobSpec],
    frames_per_group: usize,
    group_spacing_min: f64,
    seed: u64,
) -> Vec<ImageGroup> {
    let scale_rad = field.arcsec_per_pixel / ARCSEC_PER_RADIAN;
    let frame_spacing_min = field.exposure_s / 60.0;

    (0..3)
        .map(|g| {
            let mut group = ImageGroup::new(g);
            for k in 0..frames_per_group {
                let start_min = g as f64 * group_spacing_min + k as f64 * frame_spacing_min;
                let jd = EPOCH_JD + start_min / MINUTES_PER_DAY;
                // Targets are drawn at the exposure mid-time.
                let mid_min = start_min + field.exposure_s / 120.0;

                let mut blobs: Vec<BlobSpec> = stars.to_vec();
                for target in targets {
                    let (x, y) = target.position_at(mid_min, field.arcsec_per_pixel);
                    blobs.push(BlobSpec {
                        x,
                        y,
                        peak: target.peak,
                        fwhm: target.fwhm,
                    });
                }

                let cfg = SyntheticFrameConfig {
                    width: field.width,
                    height: field.height,
                    background: field.background,
                    noise_sigma: field.noise_sigma,
                    seed: seed + (g * frames_per_group + k) as u64,
                };
                let meta = FrameMeta {
                    exposure_s: field.exposure_s,
                    jd,
                    ref_coord: SkyCoord::new(1.0, 0.5),
                    ref_pixel: PixelPos::new(field.width as i32 / 2, field.height as i32 / 2),
                    scale_x: scale_rad,
                    scale_y: scale_rad,
                    rotation: 0.0,
                };
                group.add_frame(Frame::from_pixels(synthetic_frame(&cfg, &blobs), meta));
            }
            group
        })
        .collect()
}

/// Configuration for deterministic synthetic runs: a detection threshold far
/// above the noise floor, blur off, and the given sweep window.
pub fn test_config(motion_min: f64, motion_max: f64) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.sweep.motion_min = motion_min;
    config.sweep.motion_max = motion_max;
    config.sweep.pa_min_deg = 0.0;
    config.sweep.pa_max_deg = 360.0;
    config.detection.sigma_detect = 6.0;
    config.detection.position_error_px = 1.5;
    config.frames.blur = false;
    config
}
