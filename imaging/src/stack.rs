//! Stacked-image buffer with histogram-derived detection levels.

use ndarray::Array2;

/// Number of value bins in the stacked-image histogram. Pixels are already in
/// [0, 1], so one extra bin catches exact 1.0 values.
const STACK_HIST_BINS: usize = 1024;

/// Cumulative fraction at one sigma above the median of a normal
/// distribution.
const ONE_SIGMA_HIGH_FRACTION: f64 = 0.8413;

/// Result of a stacking operation, with the statistics detection runs on.
///
/// The buffer is written by exactly one owner between barrier crossings; the
/// `dirty` flag tells the display collaborator a redraw is due.
#[derive(Debug, Clone)]
pub struct StackedImage {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Pixel values in [0, 1], indexed `[[y, x]]`.
    pub pixels: Array2<f32>,
    /// Background level (histogram median).
    pub background: f32,
    /// Noise sigma (one-sigma-above-median minus median).
    pub sigma: f32,
    /// Black display level.
    pub black: f32,
    /// White display level.
    pub white: f32,
    /// Object-detection threshold.
    pub threshold: f32,
    /// Set when the pixels change; cleared by the renderer.
    pub dirty: bool,
}

impl StackedImage {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "stacked image must not be empty");
        StackedImage {
            width,
            height,
            pixels: Array2::zeros((height, width)),
            background: 0.0,
            sigma: 0.0,
            black: 0.0,
            white: 1.0,
            threshold: 1.0,
            dirty: true,
        }
    }

    /// Copy pixels and statistics from another stack of the same dimensions.
    pub fn copy_from(&mut self, other: &StackedImage) {
        self.pixels.assign(&other.pixels);
        self.background = other.background;
        self.sigma = other.sigma;
        self.black = other.black;
        self.white = other.white;
        self.threshold = other.threshold;
        self.dirty = true;
    }

    /// Derive background, sigma, display levels and detection threshold from
    /// a histogram of the stack.
    ///
    /// Exact 0.0 and 1.0 pixels are excluded from the count: they are
    /// saturated by the stretch and would skew the median. The background is
    /// the median bin; sigma is the distance to the 0.8413 cumulative point.
    /// The threshold lands `detection_sigmas` above the background, capped
    /// at 1.
    pub fn compute_histogram(
        &mut self,
        black_sigmas: f64,
        white_sigmas: f64,
        detection_sigmas: f64,
    ) {
        let mut hist = vec![0u32; STACK_HIST_BINS + 1];
        for &p in self.pixels.iter() {
            let bin = (p.clamp(0.0, 1.0) as f64 * STACK_HIST_BINS as f64) as usize;
            hist[bin] += 1;
        }

        let pix_count =
            (self.width * self.height) as f64 - hist[0] as f64 - hist[STACK_HIST_BINS] as f64;
        let median_count = pix_count * 0.5;
        let dev_count = pix_count * ONE_SIGMA_HIGH_FRACTION;

        let mut median_bin = 0.0f64;
        let mut acc = 0u64;
        for (i, &n) in hist.iter().enumerate().skip(1).take(STACK_HIST_BINS - 1) {
            acc += n as u64;
            if median_count < acc as f64 {
                median_bin = i as f64;
                break;
            }
        }
        let mut dev_bin = 0.0f64;
        acc = 0;
        for (i, &n) in hist.iter().enumerate().skip(1).take(STACK_HIST_BINS - 1) {
            acc += n as u64;
            if dev_count < acc as f64 {
                dev_bin = i as f64;
                break;
            }
        }

        let background = median_bin / STACK_HIST_BINS as f64;
        let sigma = (dev_bin - median_bin) / STACK_HIST_BINS as f64;
        self.background = background as f32;
        self.sigma = sigma as f32;
        self.black = (background - sigma * black_sigmas).max(0.0) as f32;
        self.white = (background + sigma * white_sigmas).min(1.0) as f32;
        self.threshold = (background + sigma * detection_sigmas).min(1.0) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_patterns::{synthetic_frame, SyntheticFrameConfig};
    use approx::assert_relative_eq;

    fn noise_stack(background: f64, sigma: f64, seed: u64) -> StackedImage {
        let cfg = SyntheticFrameConfig {
            width: 128,
            height: 128,
            background,
            noise_sigma: sigma,
            seed,
        };
        let mut stack = StackedImage::new(128, 128);
        // Reuse the raw-frame generator and rescale into [0, 1].
        stack
            .pixels
            .assign(&synthetic_frame(&cfg, &[]).mapv(|v| v / 65535.0));
        stack
    }

    #[test]
    fn test_histogram_statistics() {
        let mut stack = noise_stack(0.4, 0.02, 3);
        stack.compute_histogram(3.0, 9.0, 1.9);
        assert_relative_eq!(stack.background as f64, 0.4, epsilon = 0.01);
        assert_relative_eq!(stack.sigma as f64, 0.02, epsilon = 0.01);
        assert!(stack.black < stack.background);
        assert!(stack.white > stack.background);
        assert_relative_eq!(
            stack.threshold as f64,
            stack.background as f64 + 1.9 * stack.sigma as f64,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_histogram_ignores_saturated_pixels() {
        let mut stack = noise_stack(0.3, 0.01, 9);
        // Saturate a large block; the background estimate must not move.
        for y in 0..40 {
            for x in 0..128 {
                stack.pixels[[y, x]] = 1.0;
            }
        }
        stack.compute_histogram(3.0, 9.0, 1.9);
        assert_relative_eq!(stack.background as f64, 0.3, epsilon = 0.01);
    }

    #[test]
    fn test_threshold_capped_at_one() {
        let mut stack = noise_stack(0.9, 0.05, 5);
        stack.compute_histogram(3.0, 9.0, 50.0);
        assert!(stack.threshold <= 1.0);
    }
}
