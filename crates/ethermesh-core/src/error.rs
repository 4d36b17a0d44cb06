//! Runtime errors and public result codes

use thiserror::Error;

/// Result code returned by every public node entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Call succeeded (including calls that dropped bad input)
    Ok,
    /// The named network is not joined
    NetworkNotFound,
    /// Out of memory
    FatalOutOfMemory,
    /// The host data store failed during a required read or write
    FatalDataStoreFailed,
    /// An internal invariant was violated; the node should be restarted
    FatalInternal,
    /// A parameter was out of range or malformed
    InvalidArgument,
}

impl ResultCode {
    /// True for codes after which the node must not be used further
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ResultCode::FatalOutOfMemory
                | ResultCode::FatalDataStoreFailed
                | ResultCode::FatalInternal
        )
    }
}

/// Internal runtime errors; mapped to a [`ResultCode`] at the API boundary
#[derive(Debug, Error)]
pub enum CoreError {
    /// Host data store read/write failure
    #[error("Data store error: {0}")]
    DataStore(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Bad parameter from the embedding host
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The named network is not joined
    #[error("Network not found")]
    NetworkNotFound,

    /// Identity or credential failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] ethermesh_crypto::CryptoError),
}

impl From<&CoreError> for ResultCode {
    fn from(e: &CoreError) -> Self {
        match e {
            CoreError::DataStore(_) => ResultCode::FatalDataStoreFailed,
            CoreError::Internal(_) => ResultCode::FatalInternal,
            CoreError::InvalidArgument(_) => ResultCode::InvalidArgument,
            CoreError::NetworkNotFound => ResultCode::NetworkNotFound,
            CoreError::Crypto(_) => ResultCode::FatalInternal,
        }
    }
}

/// Result type for internal runtime operations
pub type CoreResult<T> = Result<T, CoreError>;
