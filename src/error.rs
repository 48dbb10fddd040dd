//! Error types.
//!
//! Two layers:
//!
//! - [`FitError`]: the numeric core's error taxonomy (solver, drift fits, input
//!   validation). Library code returns these.
//! - [`AppError`]: what the `td` binary reports. It carries a process exit code so
//!   `main` can stay tiny.

use thiserror::Error;

/// Convenience alias for results of the numeric core.
pub type FitResult<T> = Result<T, FitError>;

/// Failures of the fitting engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    /// The weighted least-squares system has no unique solution, typically because
    /// a basis function has (almost) no data in its support.
    #[error(
        "singular system: coefficient {coefficient} (knot interval [{start:.4}, {end:.4}]) has no usable data support"
    )]
    SingularSystem {
        coefficient: usize,
        start: f64,
        end: f64,
    },

    /// A drift polynomial has more parameters than the season has samples.
    #[error(
        "underdetermined fit: season {season} has {samples} included samples for {parameters} parameters"
    )]
    UnderdeterminedFit {
        season: usize,
        samples: usize,
        parameters: usize,
    },

    /// Parallel arrays disagree in length.
    #[error("length mismatch for {what}: expected {expected}, found {found}")]
    MismatchedLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A flux shift would push at least one flux to zero or below.
    #[error("flux shift {flux_shift} makes a flux non-positive")]
    NegativeFlux { flux_shift: f64 },

    #[error("invalid knots: {0}")]
    InvalidKnots(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The spline's coefficients were invalidated and not re-solved yet.
    #[error("spline coefficients are not solved for the current knots and data")]
    UnsolvedSpline,

    /// Time shifts moved after the last source fit.
    #[error("shared spline is stale: time shifts changed since the last source fit")]
    StaleSpline,

    /// Wraps an error with the label of the curve it came from.
    #[error("curve '{label}': {source}")]
    Observation {
        label: String,
        #[source]
        source: Box<FitError>,
    },
}

impl FitError {
    /// Attach the curve label to an error.
    pub fn in_observation(self, label: &str) -> Self {
        match self {
            // Never nest labels.
            FitError::Observation { .. } => self,
            other => FitError::Observation {
                label: label.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error (strips context wrappers).
    pub fn root(&self) -> &FitError {
        match self {
            FitError::Observation { source, .. } => source.root(),
            other => other,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(4, format!("Alignment failed: {err}"))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
