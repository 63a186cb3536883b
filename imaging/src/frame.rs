//! A single exposure: pixel buffer, WCS metadata and preparation filters.
//!
//! Frames arrive with raw pixel values on the 0..65535 scale. Preparation
//! runs a robust two-pass histogram to establish background and noise, then
//! stretches the frame into the [0, 1] working range the rest of the pipeline
//! assumes. The remaining operations (blur, de-lining, star subtraction, flat
//! division) all work on the stretched frame in place; pixel buffers are
//! allocated once at load and reused.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::pixel::{PixelPos, SubPixel};
use crate::sky::SkyCoord;
use crate::stack::StackedImage;

/// Minutes in a Julian day.
pub const MINUTES_PER_DAY: f64 = 1440.0;

/// Number of bins in the raw-frame histogram (one per 16-bit pixel value).
const FRAME_HIST_BINS: usize = 65536;

/// Fraction of the pixel count below the two-sigma-low point of a normal
/// distribution, relative to the median count.
const TWO_SIGMA_LOW_FRACTION: f64 = 0.0455;

/// 3x3 Gaussian kernel coefficients for corner, edge and centre taps.
const GAUSS: [f32; 3] = [0.062147, 0.124294, 0.254237];

/// Per-axis extremes of tracked stacking offsets across a group of frames.
///
/// Accumulated while tracked offsets are assigned; describes the edge bands
/// of the stack that not every frame overlaps, so detection can stay away
/// from depleted borders.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeBands {
    /// Largest +x offset seen (or 0).
    pub max_x: f64,
    /// Smallest -x offset seen (or 0).
    pub min_x: f64,
    /// Largest +y offset seen (or 0).
    pub max_y: f64,
    /// Smallest -y offset seen (or 0).
    pub min_y: f64,
}

impl EdgeBands {
    /// Fold one frame's tracked offset into the extremes.
    pub fn include(&mut self, offset: PixelPos) {
        self.max_x = self.max_x.max(offset.x as f64);
        self.min_x = self.min_x.min(offset.x as f64);
        self.max_y = self.max_y.max(offset.y as f64);
        self.min_y = self.min_y.min(offset.y as f64);
    }
}

/// WCS and exposure metadata a frame is loaded with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Exposure length in seconds.
    pub exposure_s: f64,
    /// Julian day of exposure start.
    pub jd: f64,
    /// Celestial coordinate of the reference pixel, radians.
    pub ref_coord: SkyCoord,
    /// Reference pixel.
    pub ref_pixel: PixelPos,
    /// Angular scale along x, radians per pixel.
    pub scale_x: f64,
    /// Angular scale along y, radians per pixel.
    pub scale_y: f64,
    /// Field rotation, radians.
    pub rotation: f64,
}

/// One astronomical exposure with its preparation state.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Pixel values, indexed `[[y, x]]`. Raw 0..65535 scale on load, [0, 1]
    /// after `stretch`.
    pub pixels: Array2<f32>,
    /// Exposure and WCS metadata.
    pub meta: FrameMeta,
    /// Background level from the histogram (raw scale until `stretch`).
    pub background: f32,
    /// Noise profile sigma from the histogram.
    pub noise_sigma: f32,
    /// Black stretch level.
    pub black: f32,
    /// White stretch level.
    pub white: f32,
    /// Mean pixel value after star subtraction.
    pub post_subtract_mean: f32,
    /// Offset aligning this frame to the run's common reference, no tracking.
    pub static_offset: SubPixel,
    /// Integer offset for the current synthetic-tracking step.
    pub tracked_offset: PixelPos,
}

impl Frame {
    /// Wrap a pixel buffer and its metadata into a frame.
    ///
    /// Panics if the buffer is empty.
    pub fn from_pixels(pixels: Array2<f32>, meta: FrameMeta) -> Self {
        let (height, width) = pixels.dim();
        assert!(width > 0 && height > 0, "frame must not be empty");
        Frame {
            width,
            height,
            pixels,
            meta,
            background: 0.0,
            noise_sigma: 0.0,
            black: 0.0,
            white: 65535.0,
            post_subtract_mean: 0.0,
            static_offset: SubPixel::default(),
            tracked_offset: PixelPos::default(),
        }
    }

    /// Establish background, noise sigma and stretch levels from a two-pass
    /// histogram of the raw pixel values.
    ///
    /// The first pass places the background at the median bin and estimates
    /// sigma from the two-sigma-low point. The second pass clears bins more
    /// than `lower_clip_sigmas` below the background and repeats the scan, so
    /// dead or shadowed pixels do not drag the estimates down. Black and
    /// white levels land `lower_clip_sigmas` below and `upper_sigmas` above
    /// the background.
    pub fn compute_histogram(&mut self, lower_clip_sigmas: f64, upper_sigmas: f64) {
        let mut hist = vec![0u32; FRAME_HIST_BINS];
        for &p in self.pixels.iter() {
            let bin = p.clamp(0.0, 65535.0) as usize;
            hist[bin] += 1;
        }

        let mut pix_count = (self.width * self.height) as f64 - hist[0] as f64;

        let (mut background, mut sigma_low) =
            scan_histogram(&hist, 1, pix_count * 0.5, pix_count * 0.5 * TWO_SIGMA_LOW_FRACTION);
        let mut sigma = (background - sigma_low) / 2.0;

        // Second pass with the low tail clipped away.
        let cutoff = background - lower_clip_sigmas * sigma;
        let mut i = 0usize;
        while (i as f64) < cutoff && i < FRAME_HIST_BINS {
            pix_count -= hist[i] as f64;
            hist[i] = 0;
            i += 1;
        }
        (background, sigma_low) =
            scan_histogram(&hist, 0, pix_count * 0.5, pix_count * 0.5 * TWO_SIGMA_LOW_FRACTION);
        sigma = (background - sigma_low) / 2.0;

        self.background = background as f32;
        self.noise_sigma = sigma as f32;
        self.black = (background - sigma * lower_clip_sigmas).max(0.0) as f32;
        self.white = (background + sigma * upper_sigmas).min(65535.0) as f32;
    }

    /// Linearly remap `[black, white]` to `[0, 1]`, saturating outside.
    ///
    /// The stored background is remapped along with the pixels, and the
    /// stretch levels are reset to the new full range.
    pub fn stretch(&mut self) {
        let span = self.white - self.black;
        if span <= 0.0 {
            return;
        }
        let black = self.black;
        for p in self.pixels.iter_mut() {
            *p = (p.clamp(black, black + span) - black) / span;
        }
        self.background = (self.background - black) / span;
        self.black = 0.0;
        self.white = 1.0;
    }

    /// 3x3 Gaussian smoothing of the interior; border pixels are unchanged.
    pub fn blur(&mut self) {
        let src = self.pixels.clone();
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let corners = src[[y - 1, x - 1]]
                    + src[[y - 1, x + 1]]
                    + src[[y + 1, x - 1]]
                    + src[[y + 1, x + 1]];
                let edges = src[[y, x - 1]]
                    + src[[y, x + 1]]
                    + src[[y - 1, x]]
                    + src[[y + 1, x]];
                self.pixels[[y, x]] =
                    corners * GAUSS[0] + edges * GAUSS[1] + src[[y, x]] * GAUSS[2];
            }
        }
    }

    /// Suppress fixed vertical gradient artifacts by normalizing each column
    /// to the frame background.
    ///
    /// Requires a prior `compute_histogram`. Only effective when the lines
    /// span the full column and bright objects cover less than half of it.
    pub fn de_line(&mut self) {
        if self.background <= 0.0 {
            return;
        }
        let mut column = vec![0.0f32; self.height];
        for x in 0..self.width {
            for y in 0..self.height {
                column[y] = self.pixels[[y, x]] / self.background;
            }
            column.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
            let col_median = column[self.height / 2];
            if col_median <= 0.0 {
                continue;
            }
            for y in 0..self.height {
                self.pixels[[y, x]] /= col_median;
            }
        }
    }

    /// Compute the stacking offset aligning this frame's WCS reference to the
    /// run's common reference point, rotated by the field rotation.
    ///
    /// Applied during static stacking only.
    pub fn set_static_offset(&mut self, ref_point: SkyCoord) {
        let dx = (self.meta.ref_coord.ra - ref_point.ra) / self.meta.scale_x;
        let dy = (self.meta.ref_coord.dec - ref_point.dec) / self.meta.scale_y;
        let (sin_r, cos_r) = self.meta.rotation.sin_cos();
        self.static_offset = SubPixel::new(dx * cos_r - dy * sin_r, dx * sin_r + dy * cos_r);
    }

    /// Set the integer offset that accumulates a source moving at `motion`
    /// arcsec/min along position angle `pa` onto the group's mid-time grid,
    /// and fold it into the group's edge-depletion extremes.
    pub fn set_tracked_offset(
        &mut self,
        group_mid_jd: f64,
        motion: f64,
        pa: f64,
        arcsec_per_pixel: f64,
        edges: &mut EdgeBands,
    ) {
        let d_time_min = (self.meta.jd - group_mid_jd) * MINUTES_PER_DAY;
        let dist_px = d_time_min * motion / arcsec_per_pixel;
        self.tracked_offset = PixelPos::new(
            (self.static_offset.x + dist_px * pa.sin()).round() as i32,
            (self.static_offset.y + dist_px * pa.cos()).round() as i32,
        );
        edges.include(self.tracked_offset);
    }

    /// Remove fixed stars using the cross-group superstack.
    ///
    /// The superstack is shifted onto this frame by the static offset. Where
    /// a superstack pixel exceeds its star-mask threshold the frame pixel is
    /// hard-masked to the frame background; elsewhere the superstack excess
    /// over its own background is subtracted and the result clamped to
    /// [0, 1]. Maintains the running mean used by flat synthesis.
    pub fn subtract(&mut self, superstack: &StackedImage) {
        let off_x = self.static_offset.x.round() as i32;
        let off_y = self.static_offset.y.round() as i32;
        let w = self.width as i32;
        let h = self.height as i32;
        let mut mean = 0.0f64;

        for j in 0..h {
            for i in 0..w {
                let x = i - off_x;
                let y = j - off_y;
                if x < 0 || x >= w || y < 0 || y >= h {
                    continue;
                }
                let q = superstack.pixels[[j as usize, i as usize]];
                let p = if q > superstack.threshold {
                    self.background
                } else {
                    (self.pixels[[y as usize, x as usize]] - (q - superstack.background))
                        .clamp(0.0, 1.0)
                };
                self.pixels[[y as usize, x as usize]] = p;
                mean += p as f64;
            }
        }

        self.post_subtract_mean = (mean / (self.width * self.height) as f64) as f32;
    }

    /// Divide by a synthetic flat field where the flat is positive, clamping
    /// to [0, 1].
    pub fn divide(&mut self, flat: &StackedImage) {
        for (p, &q) in self.pixels.iter_mut().zip(flat.pixels.iter()) {
            if q > 0.0 {
                *p /= q;
            }
            *p = p.clamp(0.0, 1.0);
        }
    }
}

/// Scan a histogram for the bins holding the `median_count`-th and
/// `dev_count`-th pixels, starting at `start`.
fn scan_histogram(hist: &[u32], start: usize, median_count: f64, dev_count: f64) -> (f64, f64) {
    let mut median_bin = 0.0;
    let mut acc = 0u64;
    for (i, &n) in hist.iter().enumerate().skip(start).take(hist.len() - 1 - start) {
        acc += n as u64;
        if median_count < acc as f64 {
            median_bin = i as f64;
            break;
        }
    }
    let mut dev_bin = 0.0;
    acc = 0;
    for (i, &n) in hist.iter().enumerate().skip(start).take(hist.len() - 1 - start) {
        acc += n as u64;
        if dev_count < acc as f64 {
            dev_bin = i as f64;
            break;
        }
    }
    (median_bin, dev_bin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_patterns::{synthetic_frame, BlobSpec, SyntheticFrameConfig};
    use approx::assert_relative_eq;

    fn test_meta() -> FrameMeta {
        FrameMeta {
            exposure_s: 60.0,
            jd: 2_460_000.5,
            ref_coord: SkyCoord::new(1.0, 0.5),
            ref_pixel: PixelPos::new(50, 50),
            scale_x: 1.0e-5,
            scale_y: 1.0e-5,
            rotation: 0.0,
        }
    }

    fn noisy_frame() -> Frame {
        let cfg = SyntheticFrameConfig {
            width: 100,
            height: 100,
            background: 0.1,
            noise_sigma: 0.01,
            seed: 7,
        };
        Frame::from_pixels(synthetic_frame(&cfg, &[]), test_meta())
    }

    #[test]
    fn test_histogram_finds_background() {
        let mut frame = noisy_frame();
        frame.compute_histogram(4.5, 7.5);
        // Background near 0.1 * 65535, sigma near 0.01 * 65535.
        assert_relative_eq!(frame.background as f64, 6553.5, epsilon = 200.0);
        assert_relative_eq!(frame.noise_sigma as f64, 655.0, epsilon = 200.0);
        assert!(frame.black < frame.background);
        assert!(frame.white > frame.background);
    }

    #[test]
    fn test_stretch_bounds_pixels() {
        let mut frame = noisy_frame();
        frame.compute_histogram(4.5, 7.5);
        frame.stretch();
        for &p in frame.pixels.iter() {
            assert!((0.0..=1.0).contains(&p), "pixel {p} outside [0, 1]");
        }
        assert_eq!(frame.black, 0.0);
        assert_eq!(frame.white, 1.0);
        assert!(frame.background > 0.0 && frame.background < 1.0);
    }

    #[test]
    fn test_blur_preserves_uniform_interior_and_borders() {
        let mut frame = Frame::from_pixels(Array2::from_elem((20, 20), 0.5), test_meta());
        frame.pixels[[0, 3]] = 0.9;
        frame.blur();
        // Kernel is normalized: uniform interior stays put.
        assert_relative_eq!(frame.pixels[[10, 10]], 0.5, epsilon = 1e-4);
        // Border pixels are untouched.
        assert_relative_eq!(frame.pixels[[0, 3]], 0.9, epsilon = 1e-6);
    }

    #[test]
    fn test_blur_spreads_a_spike() {
        let mut frame = Frame::from_pixels(Array2::from_elem((11, 11), 0.0), test_meta());
        frame.pixels[[5, 5]] = 1.0;
        frame.blur();
        assert_relative_eq!(frame.pixels[[5, 5]], GAUSS[2], epsilon = 1e-6);
        assert_relative_eq!(frame.pixels[[5, 4]], GAUSS[1], epsilon = 1e-6);
        assert_relative_eq!(frame.pixels[[4, 4]], GAUSS[0], epsilon = 1e-6);
    }

    #[test]
    fn test_de_line_flattens_column_gradient() {
        let mut pixels = Array2::from_elem((50, 50), 1000.0f32);
        // Brighten one column by 20 percent.
        for y in 0..50 {
            pixels[[y, 10]] = 1200.0;
        }
        let mut frame = Frame::from_pixels(pixels, test_meta());
        frame.background = 1000.0;
        frame.de_line();
        assert_relative_eq!(frame.pixels[[25, 10]], 1000.0, epsilon = 0.5);
        assert_relative_eq!(frame.pixels[[25, 20]], 1000.0, epsilon = 0.5);
    }

    #[test]
    fn test_static_offset_rotation() {
        let mut frame = noisy_frame();
        // Reference 10 pixels east of the common point, no rotation.
        let ref_point = SkyCoord::new(
            frame.meta.ref_coord.ra - 10.0 * frame.meta.scale_x,
            frame.meta.ref_coord.dec,
        );
        frame.set_static_offset(ref_point);
        assert_relative_eq!(frame.static_offset.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(frame.static_offset.y, 0.0, epsilon = 1e-9);

        // With a 90-degree field rotation the offset swings onto +y.
        frame.meta.rotation = std::f64::consts::FRAC_PI_2;
        frame.set_static_offset(ref_point);
        assert_relative_eq!(frame.static_offset.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(frame.static_offset.y, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tracked_offset_scales_with_time() {
        let mut frame = noisy_frame();
        let mut edges = EdgeBands::default();
        // Two minutes past group mid-time, 2 arcsec/min along +x, 1 arcsec/px.
        let mid = frame.meta.jd - 2.0 / MINUTES_PER_DAY;
        frame.set_tracked_offset(mid, 2.0, std::f64::consts::FRAC_PI_2, 1.0, &mut edges);
        assert_eq!(frame.tracked_offset, PixelPos::new(4, 0));
        assert_eq!(edges.max_x, 4.0);
        assert_eq!(edges.min_x, 0.0);
    }

    #[test]
    fn test_subtract_masks_star_cores() {
        let cfg = SyntheticFrameConfig {
            width: 60,
            height: 60,
            background: 0.2,
            noise_sigma: 0.005,
            seed: 11,
        };
        let star = BlobSpec {
            x: 30.0,
            y: 30.0,
            peak: 0.6,
            fwhm: 3.0,
        };
        let mut frame = Frame::from_pixels(synthetic_frame(&cfg, &[star]), test_meta());
        frame.compute_histogram(4.5, 7.5);
        frame.stretch();
        let background = frame.background;

        // Superstack carrying the same star, normalized scale.
        let mut superstack = StackedImage::new(60, 60);
        superstack.pixels.assign(&frame.pixels);
        superstack.background = background;
        superstack.threshold = 0.9;

        frame.subtract(&superstack);
        // Core is hard-masked to the frame background.
        assert_relative_eq!(frame.pixels[[30, 30]], background, epsilon = 1e-6);
        // Everywhere else the superstack excess over its background is the
        // pixel's own excess, so the result collapses to the background too.
        assert_relative_eq!(frame.pixels[[5, 5]], background, epsilon = 1e-6);
        assert!(frame.post_subtract_mean > 0.0);
    }

    #[test]
    fn test_divide_ignores_nonpositive_flat() {
        let mut frame = Frame::from_pixels(Array2::from_elem((4, 4), 0.5f32), test_meta());
        let mut flat = StackedImage::new(4, 4);
        flat.pixels.fill(2.0);
        flat.pixels[[0, 0]] = 0.0;
        frame.divide(&flat);
        assert_relative_eq!(frame.pixels[[1, 1]], 0.25, epsilon = 1e-6);
        assert_relative_eq!(frame.pixels[[0, 0]], 0.5, epsilon = 1e-6);
    }
}
