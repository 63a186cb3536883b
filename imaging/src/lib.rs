//! Image-processing primitives for synthetic-tracking detection.
//!
//! This crate holds the per-image and per-stack building blocks the pipeline
//! composes: frame preparation (robust histogram, stretch, filters, stacking
//! offsets, star subtraction, flat division), stacked-image statistics, the
//! oriented oblong aperture, and object detection by centre-of-brightness
//! refinement. Everything here is single-threaded and allocation-light; the
//! pipeline crate owns scheduling and shared state.

pub mod aperture;
pub mod detect;
pub mod frame;
pub mod pixel;
pub mod sky;
pub mod stack;
pub mod stats;
pub mod test_patterns;

pub use aperture::{Aperture, ApertureOffset};
pub use detect::{scan_objects, ImageObject, ScanBounds};
pub use frame::{EdgeBands, Frame, FrameMeta, MINUTES_PER_DAY};
pub use pixel::{PixelPos, SubPixel};
pub use sky::SkyCoord;
pub use stack::StackedImage;
