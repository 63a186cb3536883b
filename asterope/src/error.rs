use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by loading and running the detection pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The run does not have the required number of image groups.
    #[error("expected exactly {expected} image groups, found {found}")]
    GroupCount { expected: usize, found: usize },

    /// An image group ended up with no usable frames.
    #[error("image group {index} contains no frames")]
    EmptyGroup { index: usize },

    /// The first file of a run must start a group.
    #[error("first file {} does not carry the group marker {marker:?}", .path.display())]
    NoLeadingGroup { path: PathBuf, marker: String },

    /// A frame is missing a keyword the pipeline cannot run without.
    #[error("{}: missing required keyword {keyword}", .path.display())]
    MissingKeyword { path: PathBuf, keyword: &'static str },

    /// A frame's DATE-OBS value could not be parsed.
    #[error("{}: unparseable DATE-OBS value {value:?}", .path.display())]
    InvalidTimestamp { path: PathBuf, value: String },

    /// The primary HDU is not a two-dimensional image.
    #[error("{}: primary HDU is not a 2-D image", .path.display())]
    NotAnImage { path: PathBuf },

    /// A frame's dimensions differ from the first frame of the run.
    #[error(
        "{}: dimensions {got_w}x{got_h} do not match run {expected_w}x{expected_h}",
        .path.display()
    )]
    DimensionMismatch {
        path: PathBuf,
        expected_w: usize,
        expected_h: usize,
        got_w: usize,
        got_h: usize,
    },

    /// FITS access failed.
    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
