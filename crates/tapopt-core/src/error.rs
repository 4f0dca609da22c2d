//! Unified error type for the tap-optimisation crates
//!
//! [`TapOptError`] separates the failure classes the optimiser must treat
//! differently: a malformed PF vector is recoverable, a broken network model
//! aborts the run before the first iteration, and an engine failure is fatal
//! only for the evaluation that hit it.
//!
//! # Example
//!
//! ```ignore
//! use tapopt_core::{TapOptError, TapOptResult};
//!
//! fn taps_for(pf: &[f64]) -> TapOptResult<u32> {
//!     let v = sanitizer.sanitize(pf)?;
//!     driver.set_power_factors(&v)?;
//!     driver.run_daily()?;
//!     driver.get_tap_operations(&filter)
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TapOptError {
    /// Malformed PF vector (wrong length, NaN/Inf elements).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network model or event log missing or unparseable.
    #[error("Model error: {0}")]
    Model(String),

    /// The simulation engine failed while running.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Invalid optimiser or bound configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (file access, subprocess pipes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TapOptError {
    /// Whether the error must stop the whole optimisation run.
    ///
    /// Engine failures are judged per evaluation by the caller, so they are
    /// not fatal on their own.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TapOptError::Validation(_) | TapOptError::Engine(_))
    }

    pub fn is_engine(&self) -> bool {
        matches!(self, TapOptError::Engine(_))
    }
}

/// Convenience type alias for Results using TapOptError.
pub type TapOptResult<T> = Result<T, TapOptError>;

impl From<serde_json::Error> for TapOptError {
    fn from(err: serde_json::Error) -> Self {
        TapOptError::Model(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TapOptError::Engine("solver crashed at step 512".into());
        assert!(err.to_string().contains("Engine error"));
        assert!(err.to_string().contains("step 512"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "eventlog.csv");
        let err: TapOptError = io_err.into();
        assert!(matches!(err, TapOptError::Io(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fatality() {
        assert!(!TapOptError::Validation("nan".into()).is_fatal());
        assert!(!TapOptError::Engine("exit 2".into()).is_fatal());
        assert!(TapOptError::Model("missing".into()).is_fatal());
        assert!(TapOptError::Config("flowers".into()).is_fatal());
    }
}
