//! Tracklets, movers and mover scoring.
//!
//! A tracklet pairs detections from consecutive groups whose separation and
//! direction are consistent with the current sweep hypothesis. Two tracklets
//! sharing their middle detection chain into a mover. Detections are
//! identified by (group, index) ids, and tracklets carry owned copies of
//! their endpoints, so movers stay valid after the workers overwrite the
//! per-group object lists on the next sweep step.

use serde::{Deserialize, Serialize};

use imaging::stats::sample_mean_std;
use imaging::{ImageObject, SubPixel};

/// Stable identity of a detection: group index and index within that group's
/// latest object list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectId {
    pub group: usize,
    pub index: usize,
}

/// A candidate two-point track across consecutive image groups.
#[derive(Debug, Clone)]
pub struct Tracklet {
    /// Identity of the detection in the earlier group.
    pub first_id: ObjectId,
    /// Identity of the detection in the later group.
    pub second_id: ObjectId,
    /// Copy of the earlier detection.
    pub first: ImageObject,
    /// Copy of the later detection.
    pub second: ImageObject,
    /// Measured motion, arcsec/min.
    pub motion: f64,
    /// Measured position angle, radians in [0, 2pi).
    pub pa: f64,
}

/// A confirmed three-point candidate across all groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mover {
    /// The three detections, one per group.
    pub objects: [ImageObject; 3],
    /// Mean measured motion, arcsec/min.
    pub motion: f64,
    /// Position angle of the first-to-last line, radians in [0, 2pi).
    pub pa: f64,
    /// Distance of the middle detection from a straight track, pixels.
    pub err_mid: f64,
    /// Score; higher is better.
    pub score: f64,
    /// Reviewer's verdict; false until vetted.
    pub vetted: bool,
}

impl Mover {
    /// Whether `other` could be the same object on the same track: the
    /// summed distance between the first and between the middle detections
    /// stays under `distance` pixels.
    pub fn is_same_as(&self, other: &Mover, distance: f64) -> bool {
        let d = self.objects[0]
            .location
            .distance_to(other.objects[0].location)
            + self.objects[1]
                .location
                .distance_to(other.objects[1].location);
        d < distance
    }

    /// Assign the score: mean SNR over its relative scatter, divided by the
    /// mid-track residual. Dim, inconsistent or off-line candidates all lose.
    pub fn assign_score(&mut self) {
        let snrs = [
            self.objects[0].snr,
            self.objects[1].snr,
            self.objects[2].snr,
        ];
        let (mean, std) = sample_mean_std(&snrs);
        let relative = std / mean;
        self.score = (mean / relative) / self.err_mid;
    }

    /// Linear interpolation between two locations at fraction `t`.
    pub fn interpolate(a: SubPixel, b: SubPixel, t: f64) -> SubPixel {
        SubPixel::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
    }
}

/// The deduplicated, scored mover list with its review cursor.
#[derive(Debug, Default)]
pub struct MoverSet {
    movers: Vec<Mover>,
    cursor: Option<usize>,
}

impl MoverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.movers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movers.is_empty()
    }

    pub fn movers(&self) -> &[Mover] {
        &self.movers
    }

    /// Insert a mover, deduplicating against the list.
    ///
    /// A mover matching an existing one within `same_distance` replaces it
    /// only when it scores higher. Returns true if the list changed.
    pub fn insert(&mut self, mover: Mover, same_distance: f64) -> bool {
        for existing in self.movers.iter_mut() {
            if existing.is_same_as(&mover, same_distance) {
                if existing.score > mover.score {
                    return false;
                }
                *existing = mover;
                return true;
            }
        }
        self.movers.push(mover);
        true
    }

    /// Sort descending by score.
    pub fn sort_by_score(&mut self) {
        self.movers
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        self.cursor = None;
    }

    /// Move the review cursor forward (`true`) or back (`false`), saturating
    /// at both ends. Returns the selected mover, if any exist.
    pub fn select_next(&mut self, forward: bool) -> Option<&Mover> {
        if self.movers.is_empty() {
            self.cursor = None;
            return None;
        }
        let last = self.movers.len() - 1;
        let next = match (self.cursor, forward) {
            (None, true) => 0,
            (None, false) => 0,
            (Some(i), true) => (i + 1).min(last),
            (Some(i), false) => i.saturating_sub(1),
        };
        self.cursor = Some(next);
        self.movers.get(next)
    }

    /// The mover currently under the cursor.
    pub fn selected(&self) -> Option<&Mover> {
        self.cursor.and_then(|i| self.movers.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn object(x: f64, y: f64, snr: f64) -> ImageObject {
        ImageObject {
            location: SubPixel::new(x, y),
            ob_size: 10,
            threshold_count: 6,
            flux: 1.0,
            snr,
        }
    }

    fn mover(x: f64, snrs: [f64; 3], err_mid: f64) -> Mover {
        let mut m = Mover {
            objects: [
                object(x, 10.0, snrs[0]),
                object(x + 5.0, 10.0, snrs[1]),
                object(x + 10.0, 10.0, snrs[2]),
            ],
            motion: 1.0,
            pa: 0.0,
            err_mid,
            score: 0.0,
            vetted: false,
        };
        m.assign_score();
        m
    }

    #[test]
    fn test_score_rewards_bright_consistent_tracks() {
        let dim = mover(10.0, [2.0, 3.0, 4.0], 0.5);
        let bright = mover(10.0, [4.0, 6.0, 8.0], 0.5);
        // Same relative scatter and residual, double the mean SNR.
        assert!(bright.score > dim.score);
        assert_relative_eq!(bright.score, 2.0 * dim.score, epsilon = 1e-9);
    }

    #[test]
    fn test_score_penalizes_mid_error() {
        let straight = mover(10.0, [3.0, 4.0, 5.0], 0.25);
        let bent = mover(10.0, [3.0, 4.0, 5.0], 0.5);
        assert_relative_eq!(straight.score, 2.0 * bent.score, epsilon = 1e-9);
    }

    #[test]
    fn test_is_same_as_reflexive_and_symmetric() {
        let a = mover(10.0, [3.0, 4.0, 5.0], 0.5);
        let b = mover(12.0, [3.0, 4.0, 5.0], 0.5);
        assert!(a.is_same_as(&a, 1.0));
        assert_eq!(a.is_same_as(&b, 10.0), b.is_same_as(&a, 10.0));
        assert!(a.is_same_as(&b, 10.0));
        assert!(!a.is_same_as(&b, 2.0));
    }

    #[test]
    fn test_insert_keeps_higher_score() {
        let mut set = MoverSet::new();
        let weak = mover(10.0, [2.0, 3.0, 4.0], 0.5);
        let strong = mover(10.5, [6.0, 8.0, 10.0], 0.5);

        assert!(set.insert(weak.clone(), 15.0));
        assert_eq!(set.len(), 1);

        // Same track, better score: replaces.
        assert!(set.insert(strong.clone(), 15.0));
        assert_eq!(set.len(), 1);
        assert_relative_eq!(set.movers()[0].score, strong.score);

        // Same track, worse score: ignored.
        assert!(!set.insert(weak, 15.0));
        assert_eq!(set.len(), 1);

        // Distant track: appended.
        assert!(set.insert(mover(60.0, [3.0, 3.5, 4.0], 0.5), 15.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_sort_descending() {
        let mut set = MoverSet::new();
        set.insert(mover(10.0, [2.0, 3.0, 4.0], 0.5), 1.0);
        set.insert(mover(50.0, [6.0, 8.0, 10.0], 0.5), 1.0);
        set.insert(mover(90.0, [3.0, 4.0, 5.0], 0.5), 1.0);
        set.sort_by_score();
        let scores: Vec<f64> = set.movers().iter().map(|m| m.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_cursor_saturates() {
        let mut set = MoverSet::new();
        assert!(set.select_next(true).is_none());

        set.insert(mover(10.0, [2.0, 3.0, 4.0], 0.5), 1.0);
        set.insert(mover(50.0, [6.0, 8.0, 10.0], 0.5), 1.0);
        set.sort_by_score();

        let first = set.select_next(true).unwrap().score;
        let second = set.select_next(true).unwrap().score;
        assert!(first >= second);
        // Saturates at the end.
        assert_relative_eq!(set.select_next(true).unwrap().score, second);
        // And at the start.
        set.select_next(false);
        assert_relative_eq!(set.select_next(false).unwrap().score, first);
    }
}
