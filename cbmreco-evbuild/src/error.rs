//! Event building error types.

use cbmreco_core::DetectorSystem;
use thiserror::Error;

/// Result type for event building.
pub type Result<T> = std::result::Result<T, Error>;

/// Event building error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A trigger, builder or selector configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured trigger source needs input that was not passed in.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Layer cuts are configured but no tracking setup was registered.
    #[error("layer cut on {0} needs a tracking setup")]
    MissingTrackingSetup(DetectorSystem),

    /// Configuration file could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Core library error, including unsorted input.
    #[error("core error: {0}")]
    CoreError(#[from] cbmreco_core::Error),
}

impl Error {
    /// True if the error reports an unsorted time series.
    #[must_use]
    pub fn is_unsorted(&self) -> bool {
        matches!(self, Self::CoreError(cbmreco_core::Error::NotSorted { .. }))
    }
}
