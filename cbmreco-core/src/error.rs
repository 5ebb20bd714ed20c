//! Error types for cbmreco-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Offsets, sizes or addresses of a partitioned buffer do not line up.
    #[error("invalid partition structure: {0}")]
    PartitionStructure(String),

    /// Partition index past the last partition.
    #[error("partition index {index} out of range ({n_partitions} partitions)")]
    PartitionOutOfRange { index: usize, n_partitions: usize },

    /// A time series that must be sorted is not.
    #[error("{what} not sorted: element {index} precedes its predecessor")]
    NotSorted { what: String, index: usize },

    /// Operation called in a state that does not allow it.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
