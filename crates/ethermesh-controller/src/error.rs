//! Store errors

use thiserror::Error;

/// Controller store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base path unusable for the selected backend
    #[error("Invalid base path: {0}")]
    InvalidBasePath(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
