// this_file: src/error.rs
//! Error types for the covrast library

use thiserror::Error;

/// Main error type for covrast operations
#[derive(Debug, Error)]
pub enum Error {
    /// Memory could not be obtained, either from the platform allocator or
    /// because the configured off-heap limit would be exceeded
    #[error("Out of memory: {requested} bytes requested")]
    OutOfMemory {
        /// Size of the refused request in bytes
        requested: usize,
    },

    /// Operation not supported for this object (e.g. resizing a global buffer)
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Caller broke an API contract; indicates a bug in the calling pipeline
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Configuration value out of range or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Mask export error
    #[error("Image error: {0}")]
    Image(String),
}

/// Result type alias for covrast operations
pub type Result<T> = std::result::Result<T, Error>;
