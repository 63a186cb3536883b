//! Cross-group processing: run geometry, normalization, the star-mask
//! superstack, the optional synthetic flat, and the tracklet/mover chain.
//!
//! All functions here are called from the coordinator thread while the group
//! workers are parked at a barrier, except `build_movers`, which runs
//! overlapped with the workers' next stacking pass and therefore only touches
//! the tracklets built in the previous segment.

use tracing::{debug, info};

use imaging::{ImageObject, SkyCoord, StackedImage};

use crate::config::{DetectionSettings, FrameSettings};
use crate::group::ImageGroup;
use crate::mover::{Mover, MoverSet, ObjectId, Tracklet};
use crate::sweep::SweepStep;

use std::f64::consts::TAU;

/// Cross-group reference data shared read-only by all threads after setup.
#[derive(Debug, Clone)]
pub struct RunGeometry {
    /// Frame width, pixels.
    pub width: usize,
    /// Frame height, pixels.
    pub height: usize,
    /// Exposure length, seconds.
    pub exposure_s: f64,
    /// Field rotation, radians.
    pub rotation: f64,
    /// Image scale, arcsec per pixel.
    pub arcsec_per_pixel: f64,
    /// Common reference point all frames align to.
    pub ref_point: SkyCoord,
    /// Mid-time separations between consecutive groups, minutes.
    pub d_time_min: [f64; 2],
    /// Longest group elapse, minutes.
    pub max_elapse_min: f64,
}

/// Establish the run's common reference data from the loaded groups.
///
/// The reference point is the great-circle midpoint between the first frame
/// of the first group and the last frame of the last group; frame dimensions
/// and exposure are adopted from the first frame.
pub fn set_reference(groups: [&ImageGroup; 3], arcsec_per_pixel: f64) -> RunGeometry {
    let first = groups[0].frames.first().expect("group 0 has frames");
    let last = groups[2].frames.last().expect("group 2 has frames");
    let ref_point = first.meta.ref_coord.midpoint(last.meta.ref_coord);

    let d_time_min = [
        (groups[1].ref_time_jd - groups[0].ref_time_jd) * imaging::MINUTES_PER_DAY,
        (groups[2].ref_time_jd - groups[1].ref_time_jd) * imaging::MINUTES_PER_DAY,
    ];
    let max_elapse_min = groups
        .iter()
        .map(|g| g.elapse_min)
        .fold(f64::MIN, f64::max);

    RunGeometry {
        width: first.width,
        height: first.height,
        exposure_s: first.meta.exposure_s,
        rotation: first.meta.rotation,
        arcsec_per_pixel,
        ref_point,
        d_time_min,
        max_elapse_min,
    }
}

/// Shift every frame so all backgrounds sit at the overall mean, clamping to
/// [0, 1].
pub fn normalize(mut groups: [&mut ImageGroup; 3]) {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for group in groups.iter() {
        for frame in &group.frames {
            sum += frame.background as f64;
            count += 1;
        }
    }
    let mean = (sum / count as f64) as f32;

    for group in groups.iter_mut() {
        for frame in group.frames.iter_mut() {
            let adjustment = frame.background - mean;
            for p in frame.pixels.iter_mut() {
                *p = (*p - adjustment).clamp(0.0, 1.0);
            }
            frame.background = mean;
        }
    }
    debug!("normalized frame backgrounds to {:.4}", mean);
}

/// Median the three group static stacks into the superstack and set its
/// star-mask threshold.
pub fn build_superstack(
    groups: [&ImageGroup; 3],
    superstack: &mut StackedImage,
    frames_cfg: &FrameSettings,
    detection: &DetectionSettings,
) {
    for j in 0..superstack.height {
        for i in 0..superstack.width {
            let mut values = [
                groups[0].static_stack.pixels[[j, i]],
                groups[1].static_stack.pixels[[j, i]],
                groups[2].static_stack.pixels[[j, i]],
            ];
            values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
            superstack.pixels[[j, i]] = values[1];
        }
    }
    superstack.dirty = true;
    superstack.compute_histogram(
        frames_cfg.black_hist_sigmas,
        frames_cfg.white_hist_sigmas,
        detection.sigma_detect,
    );
    // The mask must catch the bright central regions of stars, so its
    // threshold sits higher than the detection threshold.
    superstack.threshold = (superstack.background
        + superstack.sigma * detection.sigma_star_mask as f32)
        .min(1.0);
}

/// Median the normalized pixels of every frame (each divided by its
/// post-subtraction mean) into a synthetic flat field.
pub fn build_flat(groups: [&ImageGroup; 3], flat: &mut StackedImage) {
    let count: usize = groups.iter().map(|g| g.frames.len()).sum();
    let median = ((count as f64 * 0.5).round() as usize).saturating_sub(1);
    let mut values = vec![0.0f32; count];

    for j in 0..flat.height {
        for i in 0..flat.width {
            let mut k = 0;
            for group in groups.iter() {
                for frame in &group.frames {
                    values[k] = if frame.post_subtract_mean > 0.0 {
                        frame.pixels[[j, i]] / frame.post_subtract_mean
                    } else {
                        0.0
                    };
                    k += 1;
                }
            }
            values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
            flat.pixels[[j, i]] = values[median];
        }
    }
    flat.dirty = true;
}

/// Builds tracklets and movers from per-group detections.
#[derive(Debug)]
pub struct Coordinator {
    geometry: RunGeometry,
    detection: DetectionSettings,
    /// Tracklets between groups 0-1 and 1-2 for the current step.
    tracklets: [Vec<Tracklet>; 2],
    /// Movers found so far, deduplicated.
    pub movers: MoverSet,
}

impl Coordinator {
    pub fn new(geometry: RunGeometry, detection: DetectionSettings) -> Self {
        Coordinator {
            geometry,
            detection,
            tracklets: [Vec::new(), Vec::new()],
            movers: MoverSet::new(),
        }
    }

    pub fn geometry(&self) -> &RunGeometry {
        &self.geometry
    }

    /// Pair detections of consecutive groups into tracklets.
    ///
    /// A pair is accepted when its separation matches the distance the
    /// current motion hypothesis covers between the group mid-times, and its
    /// direction matches the hypothesis angle. Both tolerances derive from
    /// the current sweep step sizes plus the configured position error.
    /// Tracklets copy their endpoint objects so later mover construction
    /// does not depend on the live object lists.
    pub fn build_tracklets(&mut self, objects: [&[ImageObject]; 3], step: &SweepStep) {
        let scale = self.geometry.arcsec_per_pixel;
        let pos_err = self.detection.position_error_px;

        for g in 0..2 {
            self.tracklets[g].clear();
            let d_time = self.geometry.d_time_min[g];
            let expected = step.motion * d_time;
            let distance_tol = 0.5 * step.motion_step * d_time + 2.0 * pos_err * scale;
            let pa_tol = step.pa_step / 2.0 + 2.0 * pos_err * scale / expected;

            for (i, first) in objects[g].iter().enumerate() {
                for (k, second) in objects[g + 1].iter().enumerate() {
                    let dist = first.location.distance_to(second.location) * scale;
                    if (dist - expected).abs() > distance_tol {
                        continue;
                    }
                    let mut pa = first.location.track_angle(second.location);
                    if pa < 0.0 {
                        pa += TAU;
                    }
                    if (pa - step.pa).abs() > pa_tol {
                        continue;
                    }
                    self.tracklets[g].push(Tracklet {
                        first_id: ObjectId { group: g, index: i },
                        second_id: ObjectId {
                            group: g + 1,
                            index: k,
                        },
                        first: first.clone(),
                        second: second.clone(),
                        motion: dist / d_time,
                        pa,
                    });
                }
            }
        }
        debug!(
            "built {} + {} tracklets",
            self.tracklets[0].len(),
            self.tracklets[1].len()
        );
    }

    /// Chain tracklets sharing their middle detection into movers, score
    /// them and fold them into the deduplicated mover list.
    pub fn build_movers(&mut self) {
        let pos_err = self.detection.position_error_px;
        let d0 = self.geometry.d_time_min[0];
        let d1 = self.geometry.d_time_min[1];
        let mid_fraction = d0 / (d0 + d1);
        let same_distance = 3.0 * self.detection.aperture_radius as f64;

        for first in &self.tracklets[0] {
            for second in &self.tracklets[1] {
                if first.second_id != second.first_id {
                    continue;
                }

                // The middle detection must sit on the straight line between
                // the outer two, interpolated at the mid-time fraction.
                let predicted = Mover::interpolate(
                    first.first.location,
                    second.second.location,
                    mid_fraction,
                );
                let err_mid = first.second.location.distance_to(predicted);
                if err_mid > 2.0 * pos_err {
                    continue;
                }

                let mut pa = first
                    .first
                    .location
                    .track_angle(second.second.location);
                if pa < 0.0 {
                    pa += TAU;
                }

                let mut mover = Mover {
                    objects: [
                        first.first.clone(),
                        first.second.clone(),
                        second.second.clone(),
                    ],
                    motion: (first.motion + second.motion) / 2.0,
                    pa,
                    err_mid,
                    score: 0.0,
                    vetted: false,
                };
                mover.assign_score();

                let (x, y) = (mover.objects[0].location.x, mover.objects[0].location.y);
                let (motion, pa_deg, score) = (mover.motion, mover.pa.to_degrees(), mover.score);
                if self.movers.insert(mover, same_distance) {
                    info!(
                        "mover at ({x:.0}, {y:.0}) motion={motion:.2} pa={pa_deg:.1} score={score:.2}"
                    );
                }
            }
        }
    }
}
