//! Error taxonomy for the synthesis engine and its loaders.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::field::Axis;
use crate::resample::Projection;

pub type SynthResult<T> = Result<T, SynthError>;

#[derive(Error, Debug)]
pub enum SynthError {
    // --- configuration errors ---
    /// Combinatorial synthesis needs a reference antenna plus at least one more
    #[error("at least 2 antennas are required for phase synthesis, found {0}")]
    TooFewAntennas(usize),

    #[error("combination budget {budget} yields no phase steps for {antennas} antennas")]
    EmptyCombinationSet { budget: usize, antennas: usize },

    #[error("phase randomness must be finite and >= 0, got {0}")]
    InvalidRandomness(f64),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("projection is set to {requested}, but the loaded data is {detected}")]
    ProjectionMismatch {
        requested: Projection,
        detected: Projection,
    },

    #[error("given ceiling ({ceiling}) is lower than the actual max ({max})")]
    CeilingTooLow { ceiling: f64, max: f64 },

    #[error("ceiling must be positive, got {0}")]
    NonPositiveCeiling(f64),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    // --- input-shape errors ---
    #[error("antenna {antenna} has {found} grid points, antenna 0 has {expected}")]
    GridPointMismatch {
        antenna: usize,
        expected: usize,
        found: usize,
    },

    #[error("antenna {antenna} disagrees with antenna 0 on the coordinates of point {point}")]
    CoordinateMismatch { antenna: usize, point: usize },

    #[error("more than one degenerate axis; cannot determine the cut-plane")]
    AmbiguousPlane,

    #[error("{points} points do not form a regular {nx}x{ny}x{nz} grid")]
    IrregularGrid {
        points: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    },

    #[error("interpolation point {value} on axis {axis} lies outside [{min}, {max}]")]
    OutOfBounds {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("combination drives {combination} antennas, field grid has {grid}")]
    AntennaCountMismatch { grid: usize, combination: usize },

    #[error("power map has {found} values, raster layout expects {expected}")]
    LayoutMismatch { expected: usize, found: usize },

    #[error("power map contains a non-finite value at point {0}")]
    NonFinitePower(usize),

    // --- loader / writer errors ---
    #[error("no antenna files (*.csv) found in {0}")]
    NoAntennaFiles(PathBuf),

    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}
