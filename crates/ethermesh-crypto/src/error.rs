//! Identity and credential errors

use thiserror::Error;

/// Identity and credential errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Public key bytes do not form a valid curve point
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// Address is nil, reserved, or does not match its key
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Signature bytes are malformed
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature does not verify against the claimed key
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// Operation requires the secret key of a public-only identity
    #[error("Identity has no secret key")]
    MissingSecretKey,

    /// Text or byte serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for identity operations
pub type CryptoResult<T> = Result<T, CryptoError>;
