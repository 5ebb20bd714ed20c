//! STS hit finder error types.

use thiserror::Error;

/// Result type for STS hit finding.
pub type Result<T> = std::result::Result<T, Error>;

/// STS hit finder error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The chain was run before `set_parameters`.
    #[error("hitfinder parameters not set")]
    ParametersNotSet,

    /// Observed data exceeds a statically allocated bound.
    #[error("static capacity exceeded: {what} is {observed}, configured bound is {bound}")]
    CapacityExceeded {
        /// Quantity that overflowed.
        what: &'static str,
        /// Observed value.
        observed: usize,
        /// Configured bound.
        bound: usize,
    },

    /// Parameters failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A debug verification pass found an inconsistency.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The execution backend could not be set up.
    #[error("device error: {0}")]
    DeviceError(String),

    /// Parameter file could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] cbmreco_core::Error),
}
