//! ASTEROPE - synthetic-tracking detection of faint moving objects.
//!
//! Asteroids and comets too faint to see in any single exposure become
//! detectable when a sequence of frames is digitally re-stacked along their
//! (unknown) motion. This crate sweeps a grid of motion hypotheses over
//! exactly three image groups: under the right (motion, position angle) the
//! mover's light accumulates coherently while stars smear and are masked
//! away.
//!
//! # Pipeline
//!
//! Three group workers and one coordinator run concurrently, meeting at a
//! single barrier of party four:
//!
//! 1. **Prepare** - per-frame histogram, stretch and filters; per-group
//!    static median stacks; a cross-group median superstack that masks fixed
//!    stars out of every frame; an optional synthetic flat.
//! 2. **Sweep** - per (motion, angle) step: tracked mean stacks, object
//!    detection with centre-of-brightness refinement, tracklet pairing
//!    across consecutive groups, and mover construction with scoring and
//!    deduplication. The sweep advances until its motion range is exhausted.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use asterope::{loader, scheduler, PipelineConfig, RunControl};
//!
//! let config = PipelineConfig::load(Path::new("asterope.json"));
//! let run = loader::load_groups(&fits_paths, &config.group_marker)?;
//! let control = RunControl::new();
//! let outcome = scheduler::run(&config, run.groups, run.arcsec_per_pixel, &control)?;
//!
//! for mover in outcome.movers.movers() {
//!     println!("motion {:.2}\"/min  pa {:.1}  score {:.1}",
//!              mover.motion, mover.pa.to_degrees(), mover.score);
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod loader;
pub mod mover;
pub mod report;
pub mod scheduler;
pub mod sweep;
pub mod sync;

pub use config::{DetectionSettings, FrameSettings, PipelineConfig, SweepBounds};
pub use coordinator::RunGeometry;
pub use error::PipelineError;
pub use group::ImageGroup;
pub use mover::{Mover, MoverSet, ObjectId, Tracklet};
pub use report::MoverLog;
pub use scheduler::{PipelineOutcome, RunControl, GROUP_COUNT};
pub use sweep::{SweepState, SweepStep};
