//! Object detection in tracked stacks by iterative centre-of-brightness
//! refinement.
//!
//! The scan walks a scratch copy of the stack row-major and hands every
//! pixel above the detection threshold to the refiner. The refiner grows a
//! candidate from the full oblong aperture, repeatedly re-centring on the
//! centre of brightness and shrinking the working radius in half-pixel steps
//! until the candidate either proves compact and bright enough or fails one
//! of the rejection rules. Accepted apertures are blanked to the background in
//! the scratch buffer so a bright object is reported exactly once.

use serde::{Deserialize, Serialize};

use crate::aperture::Aperture;
use crate::pixel::SubPixel;
use crate::stack::StackedImage;

/// A candidate detection in one group's tracked stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageObject {
    /// Refined location in stack coordinates.
    pub location: SubPixel,
    /// Pixel count of the accepted aperture.
    pub ob_size: usize,
    /// Pixels over the detection threshold inside the accepted aperture.
    pub threshold_count: usize,
    /// Net flux (sum over aperture of pixel minus background).
    pub flux: f64,
    /// Flux inside the object over flux outside it (or the stack sigma).
    pub snr: f64,
}

/// Inclusive-exclusive scan rectangle for the detection pass.
#[derive(Debug, Clone, Copy)]
pub struct ScanBounds {
    pub x0: i32,
    pub x1: i32,
    pub y0: i32,
    pub y1: i32,
}

/// Scan `scratch` for objects using the given aperture.
///
/// `min_pix` is the minimum number of threshold-exceeding pixels a valid
/// object needs (the track-length allowance already folded in). The scan
/// rectangle is clamped so the aperture, including the worst-case
/// centre-of-brightness excursion, can never read outside the image.
///
/// The scratch buffer is consumed: accepted objects are blanked in place.
pub fn scan_objects(
    scratch: &mut StackedImage,
    aperture: &Aperture,
    min_pix: usize,
    bounds: ScanBounds,
) -> Vec<ImageObject> {
    let margin = 2 * aperture.ap_radius;
    let x0 = bounds.x0.max(margin);
    let x1 = bounds.x1.min(scratch.width as i32 - margin);
    let y0 = bounds.y0.max(margin);
    let y1 = bounds.y1.min(scratch.height as i32 - margin);

    let mut objects = Vec::new();
    for j in y0..y1 {
        for i in x0..x1 {
            if scratch.pixels[[j as usize, i as usize]] > scratch.threshold {
                if let Some(object) = refine_object(scratch, aperture, min_pix, i, j) {
                    objects.push(object);
                }
            }
        }
    }
    objects
}

/// Refine a candidate seeded at `(seed_x, seed_y)`.
///
/// Returns `None` when the candidate fails the flux floor, drifts out of the
/// aperture, or never accumulates enough threshold pixels.
fn refine_object(
    stack: &mut StackedImage,
    aperture: &Aperture,
    min_pix: usize,
    seed_x: i32,
    seed_y: i32,
) -> Option<ImageObject> {
    let background = stack.background as f64;
    let threshold = stack.threshold as f64;
    let required_flux = min_pix as f64 * (threshold - background);
    let required_pix = ((min_pix as f64 * 0.5) as usize).max(2);

    // Net flux over the full aperture at the seed position.
    let mut flux = 0.0f64;
    for off in &aperture.offsets {
        let p = stack.pixels[[(seed_y + off.dy) as usize, (seed_x + off.dx) as usize]];
        flux += p as f64 - background;
    }
    if flux < required_flux {
        return None;
    }

    let mut cx = seed_x;
    let mut cy = seed_y;
    let mut c = aperture.radius as f64 + 0.5;
    let mut all_flux = 0.0f64;
    let mut p_count;
    let mut t_count;

    loop {
        // Centre-of-brightness correction, weighted by the previous flux.
        let mut cob_x = 0.0f64;
        let mut cob_y = 0.0f64;
        for off in &aperture.offsets {
            if off.dist > c {
                break;
            }
            let p = stack.pixels[[(cy + off.dy) as usize, (cx + off.dx) as usize]];
            let f = (p as f64 - background) / flux;
            cob_x += f * off.dx as f64;
            cob_y += f * off.dy as f64;
        }
        cx += cob_x.round() as i32;
        cy += cob_y.round() as i32;
        if (cx - seed_x).abs() > aperture.ap_radius || (cy - seed_y).abs() > aperture.ap_radius {
            return None;
        }

        // Shrink the working radius and re-measure.
        c -= 0.5;
        flux = 0.0;
        p_count = 0;
        t_count = 0;
        for off in &aperture.offsets {
            if off.dist > c {
                break;
            }
            let p = stack.pixels[[(cy + off.dy) as usize, (cx + off.dx) as usize]] as f64;
            if p > threshold {
                t_count += 1;
            }
            flux += p - background;
            p_count += 1;
        }
        if c == aperture.radius as f64 {
            all_flux = flux;
        }

        if t_count < required_pix {
            return None;
        }
        // Aperture saturated with threshold pixels: a large object.
        if t_count >= p_count {
            break;
        }
        // Reached the FWHM core: accept only a compact, bright candidate.
        if p_count <= aperture.fwhm_count {
            if flux > required_flux || t_count >= min_pix {
                break;
            }
            return None;
        }
    }

    let out_flux = (all_flux - flux).max(stack.sigma as f64);
    let snr = flux / out_flux;

    // Blank the accepted aperture so it cannot seed another detection.
    for off in &aperture.offsets[..p_count] {
        stack.pixels[[(cy + off.dy) as usize, (cx + off.dx) as usize]] = stack.background;
    }

    Some(ImageObject {
        location: SubPixel::new(cx as f64, cy as f64),
        ob_size: p_count,
        threshold_count: t_count,
        flux,
        snr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_patterns::{synthetic_frame, BlobSpec, SyntheticFrameConfig};

    fn stack_with_blobs(blobs: &[BlobSpec], seed: u64) -> StackedImage {
        let cfg = SyntheticFrameConfig {
            width: 100,
            height: 100,
            background: 0.1,
            noise_sigma: 0.005,
            seed,
        };
        let mut stack = StackedImage::new(100, 100);
        stack
            .pixels
            .assign(&synthetic_frame(&cfg, blobs).mapv(|v| v / 65535.0));
        // A four-sigma threshold keeps the noise floor out of the scan for
        // any seed.
        stack.compute_histogram(3.0, 9.0, 4.0);
        stack
    }

    fn full_bounds() -> ScanBounds {
        ScanBounds {
            x0: 0,
            x1: 100,
            y0: 0,
            y1: 100,
        }
    }

    #[test]
    fn test_detects_single_blob() {
        // Compact and faint: every above-threshold pixel sits inside the
        // final aperture, so the accept-and-blank cycle runs exactly once.
        let blob = BlobSpec {
            x: 50.0,
            y: 40.0,
            peak: 0.06,
            fwhm: 3.0,
        };
        let mut stack = stack_with_blobs(&[blob], 21);
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        let objects = scan_objects(&mut stack, &aperture, 4, full_bounds());

        assert_eq!(objects.len(), 1, "expected one detection: {objects:?}");
        let ob = &objects[0];
        assert!((ob.location.x - 50.0).abs() <= 1.5);
        assert!((ob.location.y - 40.0).abs() <= 1.5);
        assert!(ob.flux > 0.0);
        assert!(ob.snr > 1.0);
        assert!(ob.threshold_count >= 2);
    }

    #[test]
    fn test_accepted_aperture_is_blanked() {
        let blob = BlobSpec {
            x: 50.0,
            y: 50.0,
            peak: 0.06,
            fwhm: 3.0,
        };
        let mut stack = stack_with_blobs(&[blob], 22);
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        let first = scan_objects(&mut stack, &aperture, 4, full_bounds());
        assert_eq!(first.len(), 1);
        // The blob core is now at the background level.
        let second = scan_objects(&mut stack, &aperture, 4, full_bounds());
        assert!(second.is_empty(), "blanked object re-detected: {second:?}");
    }

    #[test]
    fn test_pure_noise_yields_nothing() {
        let mut stack = stack_with_blobs(&[], 23);
        // Raise the bar well above the noise floor.
        stack.compute_histogram(3.0, 9.0, 6.0);
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        let objects = scan_objects(&mut stack, &aperture, 6, full_bounds());
        assert!(objects.is_empty(), "noise detections: {objects:?}");
    }

    #[test]
    fn test_blob_outside_scan_rectangle_is_ignored() {
        let blob = BlobSpec {
            x: 50.0,
            y: 50.0,
            peak: 0.4,
            fwhm: 3.0,
        };
        let mut stack = stack_with_blobs(&[blob], 24);
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        let bounds = ScanBounds {
            x0: 70,
            x1: 100,
            y0: 0,
            y1: 100,
        };
        let objects = scan_objects(&mut stack, &aperture, 4, bounds);
        assert!(objects.is_empty());
    }

    #[test]
    fn test_edge_blob_never_panics() {
        let blob = BlobSpec {
            x: 2.0,
            y: 97.0,
            peak: 0.6,
            fwhm: 3.0,
        };
        let mut stack = stack_with_blobs(&[blob], 25);
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        // Even with caller-supplied bounds covering the whole image, the
        // clamped margin keeps every read in bounds.
        let objects = scan_objects(&mut stack, &aperture, 4, full_bounds());
        assert!(objects.len() <= 1);
    }

    #[test]
    fn test_single_hot_pixel_rejected() {
        let mut stack = stack_with_blobs(&[], 26);
        stack.pixels[[50, 50]] = 1.0;
        let aperture = Aperture::oblong(5, 0.0, 0.0);
        // A lone hot pixel cannot supply the required threshold pixels.
        let objects = scan_objects(&mut stack, &aperture, 8, full_bounds());
        assert!(objects.is_empty(), "hot pixel accepted: {objects:?}");
    }
}
