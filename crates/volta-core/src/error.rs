//! Unified error types for the volta engine
//!
//! [`VoltaError`] covers every failure an analysis can raise. Structural and
//! parameter problems are detected before any numerical work starts, so a
//! caller that receives [`VoltaError::Validation`] or [`VoltaError::Parameter`]
//! knows no solver ran. Non-convergence is *not* an error: solvers report it
//! in their result structs.
//!
//! # Example
//!
//! ```ignore
//! use volta_core::{VoltaError, VoltaResult};
//!
//! fn study(network: &Network) -> VoltaResult<()> {
//!     network.validate()?;
//!     let flow = perform_load_flow(network)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all volta operations.
#[derive(Error, Debug)]
pub enum VoltaError {
    /// I/O errors (config files, network files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Structural topology errors (missing slack, islands, unknown ids)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid analysis parameters (unknown fault bus, missing sequence data)
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Singular matrices and other numerical breakdowns
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// The caller requested cancellation
    #[error("Analysis cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using VoltaError.
pub type VoltaResult<T> = Result<T, VoltaError>;

impl VoltaError {
    /// True for errors raised before any solver work began.
    pub fn is_input_error(&self) -> bool {
        matches!(self, VoltaError::Validation(_) | VoltaError::Parameter(_))
    }
}

impl From<anyhow::Error> for VoltaError {
    fn from(err: anyhow::Error) -> Self {
        VoltaError::Other(format!("{err:#}"))
    }
}

impl From<String> for VoltaError {
    fn from(s: String) -> Self {
        VoltaError::Other(s)
    }
}

impl From<&str> for VoltaError {
    fn from(s: &str) -> Self {
        VoltaError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for VoltaError {
    fn from(err: serde_json::Error) -> Self {
        VoltaError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoltaError::Numerical("singular Jacobian".into());
        assert!(err.to_string().contains("Numerical failure"));
        assert!(err.to_string().contains("singular Jacobian"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VoltaError = io_err.into();
        assert!(matches!(err, VoltaError::Io(_)));
    }

    #[test]
    fn test_input_error_classification() {
        assert!(VoltaError::Validation("no slack".into()).is_input_error());
        assert!(VoltaError::Parameter("unknown bus".into()).is_input_error());
        assert!(!VoltaError::Cancelled.is_input_error());
        assert!(!VoltaError::Numerical("x".into()).is_input_error());
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> VoltaResult<()> {
            Err(VoltaError::Validation("test".into()))
        }

        fn outer() -> VoltaResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
