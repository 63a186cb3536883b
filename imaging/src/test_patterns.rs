//! Synthetic frame generation for pipeline validation.
//!
//! NOTE: these are not realistic star fields. They exist so the stacking and
//! detection algorithms can be exercised deterministically without FITS data.
//! Frames are produced on the raw 0..65535 scale the loader would deliver.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Parameters for one synthetic Gaussian blob.
#[derive(Debug, Clone, Copy)]
pub struct BlobSpec {
    /// Centre x coordinate in pixels.
    pub x: f64,
    /// Centre y coordinate in pixels.
    pub y: f64,
    /// Peak amplitude above the background, on the normalized [0, 1] scale.
    pub peak: f64,
    /// Full width at half maximum in pixels.
    pub fwhm: f64,
}

/// Configuration for synthetic frame generation.
///
/// `background` and `noise_sigma` are on the normalized [0, 1] scale; the
/// generated frame is scaled to raw 0..65535 values.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticFrameConfig {
    pub width: usize,
    pub height: usize,
    pub background: f64,
    pub noise_sigma: f64,
    pub seed: u64,
}

impl Default for SyntheticFrameConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            background: 0.1,
            noise_sigma: 0.01,
            seed: 42,
        }
    }
}

/// Generate a raw-scale frame of Gaussian noise around a flat background,
/// with the given blobs added.
pub fn synthetic_frame(config: &SyntheticFrameConfig, blobs: &[BlobSpec]) -> Array2<f32> {
    let mut image = Array2::<f64>::from_elem((config.height, config.width), config.background);

    for blob in blobs {
        // FWHM = 2.355 sigma.
        let sigma = blob.fwhm / 2.355;
        let two_sigma_sq = 2.0 * sigma * sigma;
        let radius = (4.0 * sigma).ceil() as i64;

        let y_min = ((blob.y as i64 - radius).max(0)) as usize;
        let y_max = ((blob.y as i64 + radius + 1).min(config.height as i64)).max(0) as usize;
        let x_min = ((blob.x as i64 - radius).max(0)) as usize;
        let x_max = ((blob.x as i64 + radius + 1).min(config.width as i64)).max(0) as usize;

        for y in y_min..y_max {
            for x in x_min..x_max {
                let dx = x as f64 - blob.x;
                let dy = y as f64 - blob.y;
                let r_sq = dx * dx + dy * dy;
                image[[y, x]] += blob.peak * (-r_sq / two_sigma_sq).exp();
            }
        }
    }

    if config.noise_sigma > 0.0 {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let noise = Normal::new(0.0, config.noise_sigma).expect("valid noise sigma");
        for pixel in image.iter_mut() {
            *pixel += noise.sample(&mut rng);
        }
    }

    image.mapv(|v| (v * 65535.0).clamp(0.0, 65535.0) as f32)
}
