//! Oriented oblong aperture for tracked-object photometry.
//!
//! The aperture is the set of integer pixel offsets whose perpendicular
//! distance to a centred track segment is at most the aperture radius. The
//! segment's length and orientation follow the motion hypothesis, so a source
//! smeared along the hypothesized track is fully enclosed. Offsets are sorted
//! by ascending distance from the track, letting the detector scan outward
//! from the track core and shrink the working radius with a simple prefix cut.

/// One aperture offset with its perpendicular distance from the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApertureOffset {
    /// X offset from the aperture centre.
    pub dx: i32,
    /// Y offset from the aperture centre.
    pub dy: i32,
    /// Distance from the track segment, in pixels.
    pub dist: f64,
}

/// An oriented oblong aperture.
///
/// `offsets` is sorted by ascending `dist`; a prefix of the list is exactly
/// the sub-aperture of some smaller working radius.
#[derive(Debug, Clone)]
pub struct Aperture {
    /// Aperture offsets in ascending distance order.
    pub offsets: Vec<ApertureOffset>,
    /// Radius of a circle fully enclosing the aperture, plus a one-pixel
    /// guard band. Bounds the image margin a detection scan must honour.
    pub ap_radius: i32,
    /// Number of offsets inside the FWHM sub-aperture (`dist <= 0.4 * radius`).
    pub fwhm_count: usize,
    /// Radius the aperture was built with.
    pub radius: i32,
}

impl Aperture {
    /// Build an oblong aperture of the given radius around a centred track of
    /// `track_len` pixels at position angle `pa` radians.
    pub fn oblong(radius: i32, track_len: f64, pa: f64) -> Self {
        let fwhm_radius = (0.4 * radius as f64).round();
        let mut fwhm_count = 0usize;

        // Endpoints of the centred track segment.
        let ex = 0.5 * track_len * pa.sin();
        let ey = 0.5 * track_len * pa.cos();
        let cc = (ex * ex + ey * ey).sqrt() * 2.0;

        let r = radius + (cc / 2.0).ceil() as i32;
        let mut offsets = Vec::new();

        for dy in -r..=r {
            for dx in -r..=r {
                if dx == 0 && dy == 0 {
                    offsets.push(ApertureOffset {
                        dx: 0,
                        dy: 0,
                        dist: 0.0,
                    });
                    fwhm_count += 1;
                    continue;
                }
                let d1_sq = (dx as f64 + ex).powi(2) + (dy as f64 + ey).powi(2);
                let d2_sq = (dx as f64 - ex).powi(2) + (dy as f64 - ey).powi(2);

                // Past either end of the segment the nearest point is the
                // endpoint itself; otherwise Heron's formula gives the
                // triangle height over the segment. A degenerate segment is a
                // point, making the aperture a plain disc.
                let dist = if cc <= f64::EPSILON {
                    d1_sq.sqrt()
                } else if (d1_sq - d2_sq).abs() > cc * cc {
                    d1_sq.min(d2_sq).sqrt()
                } else {
                    let d1 = d1_sq.sqrt();
                    let d2 = d2_sq.sqrt();
                    let s = (d1 + d2 + cc) / 2.0;
                    let area = (s * (s - d1) * (s - d2) * (s - cc)).max(0.0).sqrt();
                    2.0 * area / cc
                };

                if dist <= radius as f64 {
                    offsets.push(ApertureOffset { dx, dy, dist });
                }
                if dist <= fwhm_radius {
                    fwhm_count += 1;
                }
            }
        }

        // Stable sort keeps scan order among equidistant offsets.
        offsets.sort_by(|a, b| a.dist.partial_cmp(&b.dist).unwrap());

        Aperture {
            offsets,
            ap_radius: r + 1,
            fwhm_count,
            radius,
        }
    }
}
