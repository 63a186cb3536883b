//! Equatorial coordinates for frame alignment.
//!
//! Only the small amount of spherical geometry the stacking pipeline needs:
//! a radian (RA, Dec) pair and the great-circle midpoint used to anchor the
//! common reference point of a run.

use serde::{Deserialize, Serialize};

/// Arcseconds per radian.
pub const ARCSEC_PER_RADIAN: f64 = 206_264.806_247_096_36;

/// Equatorial coordinate (RA, Dec) in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkyCoord {
    /// Right ascension in radians.
    pub ra: f64,
    /// Declination in radians.
    pub dec: f64,
}

impl SkyCoord {
    pub fn new(ra: f64, dec: f64) -> Self {
        Self { ra, dec }
    }

    /// Great-circle midpoint between this point and `other`.
    pub fn midpoint(&self, other: SkyCoord) -> SkyCoord {
        let bx = other.dec.cos() * (other.ra - self.ra).cos();
        let by = other.dec.cos() * (other.ra - self.ra).sin();
        let dec = (self.dec.sin() + other.dec.sin())
            .atan2(((self.dec.cos() + bx).powi(2) + by * by).sqrt());
        let ra = self.ra + by.atan2(self.dec.cos() + bx);
        SkyCoord { ra, dec }
    }
}
