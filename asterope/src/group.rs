//! An image group: the frames of one observation window and their stacks.
//!
//! Each group owns its frames, a static median stack used for star masking,
//! a tracked mean stack re-built at every sweep step, and the scratch buffer
//! the object search consumes. One worker thread drives each group; the
//! coordinator touches a group only while the workers are parked at a
//! barrier.

use imaging::aperture::Aperture;
use imaging::detect::{scan_objects, ScanBounds};
use imaging::frame::MINUTES_PER_DAY;
use imaging::{EdgeBands, Frame, ImageObject, StackedImage};

use crate::config::{DetectionSettings, FrameSettings};
use crate::sweep::SweepStep;

/// Quantized aperture cache key: radius, track length in milli-pixels,
/// position angle in tenth-milliradians.
type ApertureKey = (i32, i64, i64);

/// A group of same-field frames with contiguous exposures.
#[derive(Debug)]
pub struct ImageGroup {
    /// Index of this group in the run (0..3).
    pub index: usize,
    /// The frames, in observation order. Membership is fixed after load.
    pub frames: Vec<Frame>,
    /// Frame width, adopted from the first frame.
    pub width: usize,
    /// Frame height, adopted from the first frame.
    pub height: usize,
    /// Exposure seconds, adopted from the first frame.
    pub exposure_s: f64,
    /// Reference timestamp: midpoint of first exposure start and last
    /// exposure end, Julian day.
    pub ref_time_jd: f64,
    /// Elapse from first to last frame, floored at one exposure, minutes.
    pub elapse_min: f64,
    /// Static median stack including fixed stars.
    pub static_stack: StackedImage,
    /// Tracked mean stack for the current sweep step.
    pub tracked_stack: StackedImage,
    /// Objects found in the latest search.
    pub objects: Vec<ImageObject>,
    /// Scratch buffer the object search consumes.
    scratch: StackedImage,
    /// Edge-depletion extremes of the latest tracked offsets.
    edges: EdgeBands,
    /// Cached aperture for the current (track, angle) quantization.
    aperture_cache: Option<(ApertureKey, Aperture)>,
}

impl ImageGroup {
    pub fn new(index: usize) -> Self {
        ImageGroup {
            index,
            frames: Vec::new(),
            width: 0,
            height: 0,
            exposure_s: 0.0,
            ref_time_jd: 0.0,
            elapse_min: 0.0,
            // Buffers are sized on the first frame.
            static_stack: StackedImage::new(1, 1),
            tracked_stack: StackedImage::new(1, 1),
            objects: Vec::new(),
            scratch: StackedImage::new(1, 1),
            edges: EdgeBands::default(),
            aperture_cache: None,
        }
    }

    /// Add a frame. The first frame fixes the group's dimensions and
    /// exposure, and sizes the stacking buffers.
    pub fn add_frame(&mut self, frame: Frame) {
        if self.frames.is_empty() {
            self.width = frame.width;
            self.height = frame.height;
            self.exposure_s = frame.meta.exposure_s;
            self.static_stack = StackedImage::new(self.width, self.height);
            self.tracked_stack = StackedImage::new(self.width, self.height);
            self.scratch = StackedImage::new(self.width, self.height);
        }
        self.frames.push(frame);
    }

    /// Set the group reference time to the midpoint of the first exposure
    /// start and the last exposure end, and the elapse time from first to
    /// last frame (floored at one exposure length).
    pub fn set_reference_time(&mut self) {
        let first = self.frames.first().expect("group has frames");
        let last = self.frames.last().expect("group has frames");
        let start = first.meta.jd;
        let last_start = last.meta.jd;
        self.elapse_min =
            ((last_start - start) * MINUTES_PER_DAY).max(self.exposure_s / 60.0);
        let end = last_start + last.meta.exposure_s / 86_400.0;
        self.ref_time_jd = (start + end) / 2.0;
    }

    /// Median-stack the frames with their static offsets into the static
    /// stack and refresh its statistics.
    ///
    /// Out-of-bounds samples contribute zero, matching the depleted edges a
    /// display shows.
    pub fn build_static_stack(&mut self, frames_cfg: &FrameSettings, detection: &DetectionSettings) {
        let count = self.frames.len();
        let median = count / 2;
        let mut values = vec![0.0f32; count];
        let w = self.width as i32;
        let h = self.height as i32;

        for j in 0..h {
            for i in 0..w {
                values.fill(0.0);
                for (k, frame) in self.frames.iter().enumerate() {
                    let x = i - frame.static_offset.x.round() as i32;
                    let y = j - frame.static_offset.y.round() as i32;
                    if x >= 0 && x < w && y >= 0 && y < h {
                        values[k] = frame.pixels[[y as usize, x as usize]];
                    }
                }
                values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
                self.static_stack.pixels[[j as usize, i as usize]] = values[median];
            }
        }
        self.static_stack.dirty = true;
        self.static_stack.compute_histogram(
            frames_cfg.black_hist_sigmas,
            frames_cfg.white_hist_sigmas,
            detection.sigma_detect,
        );
    }

    /// Mean-stack the frames with tracked offsets for the given hypothesis
    /// into the tracked stack and refresh its statistics.
    ///
    /// The divisor is the frame count whether or not a sample was in bounds,
    /// so depleted edges darken rather than brighten.
    pub fn build_tracked_stack(
        &mut self,
        motion: f64,
        pa: f64,
        arcsec_per_pixel: f64,
        frames_cfg: &FrameSettings,
        detection: &DetectionSettings,
    ) {
        self.edges = EdgeBands::default();
        let mid = self.ref_time_jd;
        for frame in self.frames.iter_mut() {
            frame.set_tracked_offset(mid, motion, pa, arcsec_per_pixel, &mut self.edges);
        }

        let count = self.frames.len() as f32;
        let w = self.width as i32;
        let h = self.height as i32;

        for j in 0..h {
            for i in 0..w {
                let mut sum = 0.0f32;
                for frame in &self.frames {
                    let x = i - frame.tracked_offset.x;
                    let y = j - frame.tracked_offset.y;
                    if x >= 0 && x < w && y >= 0 && y < h {
                        sum += frame.pixels[[y as usize, x as usize]];
                    }
                }
                self.tracked_stack.pixels[[j as usize, i as usize]] = sum / count;
            }
        }
        self.tracked_stack.dirty = true;
        self.tracked_stack.compute_histogram(
            frames_cfg.black_hist_sigmas,
            frames_cfg.white_hist_sigmas,
            detection.sigma_detect,
        );
    }

    /// Search the tracked stack for objects under the current hypothesis.
    ///
    /// The aperture track length follows the smear a source at `motion`
    /// leaves over one exposure. The scan stays inside the region every
    /// frame overlaps, inset by four aperture radii so the refiner can never
    /// read out of bounds.
    pub fn find_objects(&mut self, step: &SweepStep, arcsec_per_pixel: f64, detection: &DetectionSettings) {
        let track_px = step.motion * self.exposure_s / (60.0 * arcsec_per_pixel);
        let aperture = self.aperture(detection.aperture_radius, track_px, step.pa);
        let min_pix = detection.threshold_pix_base + track_px as usize;

        let limit = 4 * aperture.ap_radius;
        let bounds = ScanBounds {
            x0: self.edges.max_x as i32 + limit,
            x1: self.width as i32 - limit + self.edges.min_x as i32,
            y0: self.edges.max_y as i32 + limit,
            y1: self.height as i32 - limit + self.edges.min_y as i32,
        };

        self.scratch.copy_from(&self.tracked_stack);
        self.objects = scan_objects(&mut self.scratch, &aperture, min_pix, bounds);
    }

    /// Aperture for the given geometry, rebuilt only when the quantized
    /// (radius, track, angle) key changes.
    fn aperture(&mut self, radius: i32, track_px: f64, pa: f64) -> Aperture {
        let key: ApertureKey = (
            radius,
            (track_px * 1_000.0).round() as i64,
            (pa * 10_000.0).round() as i64,
        );
        match &self.aperture_cache {
            Some((cached_key, aperture)) if *cached_key == key => aperture.clone(),
            _ => {
                let aperture = Aperture::oblong(radius, track_px, pa);
                self.aperture_cache = Some((key, aperture.clone()));
                aperture
            }
        }
    }
}
