use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-level error, returned by operations that may fail either on invalid
/// physical input or on persistence.
#[derive(Error, Debug)]
pub enum BloodDvhError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Invalid physical parameters or simulation settings.
///
/// Raised eagerly, before any state is built from the offending input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The compartment list is empty
    #[error("The compartment list is empty")]
    EmptyCompartments,

    /// A compartment volume is negative or not finite
    #[error("Invalid volume {value} for compartment '{compartment}'")]
    InvalidVolume { compartment: String, value: f64 },

    /// A compartment has no blood volume but non-zero outflow
    #[error("Compartment '{compartment}' has zero volume but {outflow}% outflow")]
    ZeroVolumeWithOutflow { compartment: String, outflow: f64 },

    /// A flow entry is negative or not finite
    #[error("Invalid flow {value} from '{from}' to '{to}'")]
    InvalidFlow { from: String, to: String, value: f64 },

    /// The total outflow probability of a row exceeds one at the chosen resolution
    #[error(
        "Outflow probability {outflow} of compartment '{compartment}' (row {row}) exceeds 1 at \
         resolution {resolution} steps/min; increase the resolution"
    )]
    ResolutionTooCoarse {
        row: usize,
        compartment: String,
        outflow: f64,
        resolution: f64,
    },

    /// A physiological or numeric parameter is not usable
    #[error("Invalid parameter: {param} = {value}")]
    InvalidParameter { param: String, value: String },

    /// The transition matrix is not square
    #[error("Transition matrix must be square, got {nrows}x{ncols}")]
    NotSquare { nrows: usize, ncols: usize },

    /// A transition matrix entry is outside [0, 1]
    #[error("Transition probability P[{row}][{col}] = {value} is outside [0, 1]")]
    ProbabilityOutOfRange { row: usize, col: usize, value: f64 },

    /// A transition matrix row does not sum to one
    #[error("Row {row} of the transition matrix sums to {sum}, expected 1")]
    NotRowStochastic { row: usize, sum: f64 },

    /// Fewer than one particle was requested
    #[error("Sample size must be at least 1, got {0}")]
    InvalidSampleSize(usize),

    /// A duration is zero, negative or not finite
    #[error("Duration of {context} must be positive, got {value}")]
    InvalidDuration { context: String, value: f64 },

    /// `dt` and `resolution` describe different step lengths
    #[error("dt = {dt} s does not match resolution {resolution} steps/min (expected dt = {expected} s)")]
    InconsistentResolution {
        dt: f64,
        resolution: f64,
        expected: f64,
    },

    /// The initial particle distribution cannot be sampled
    #[error("Invalid initial distribution: {reason}")]
    InvalidInitialDistribution { reason: String },

    /// An organ index outside the compartment range
    #[error("Organ index {organ} is out of range for {ncompartments} compartments")]
    OrganOutOfRange { organ: usize, ncompartments: usize },

    /// A negative or non-finite start time
    #[error("Start time must be non-negative, got {0}")]
    InvalidStartTime(f64),

    /// A dose-rate function returned a negative or non-finite value
    #[error("Segment {segment} yields invalid dose rate {value} for organ {organ}")]
    InvalidDoseRate {
        segment: usize,
        organ: usize,
        value: f64,
    },

    /// Array length mismatch between related inputs
    #[error("Dimension mismatch: {description}")]
    DimensionMismatch { description: String },
}

impl ConfigurationError {
    pub(crate) fn invalid_param(param: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            value: value.to_string(),
        }
    }

    pub(crate) fn mismatch(description: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            description: description.into(),
        }
    }
}

/// Failures while saving, loading or exporting simulation results.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Underlying file system error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unwritable CSV document
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The document parsed but its content is inconsistent
    #[error("Schema mismatch in {path}: {description}")]
    Schema { path: PathBuf, description: String },

    /// The document was written by an incompatible version
    #[error("Unsupported format version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            description: description.into(),
        }
    }
}

/// Non-fatal deviation of a probability row from unit sum.
///
/// The row is re-normalized and the simulation proceeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericalWarning {
    /// Row (compartment) index that was re-normalized
    pub row: usize,
    /// Sum observed before re-normalization
    pub sum: f64,
}

impl NumericalWarning {
    pub fn deviation(&self) -> f64 {
        (self.sum - 1.0).abs()
    }
}

impl fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {} sums to {:.15} (deviation {:.3e}), re-normalized",
            self.row,
            self.sum,
            self.deviation()
        )
    }
}
