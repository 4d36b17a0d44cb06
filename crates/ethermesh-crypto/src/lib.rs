//! Ethermesh Cryptographic Identity
//!
//! Provides the identity layer for ethermesh nodes:
//! - Ed25519 signing keypairs with a derived 40-bit address
//! - Canonical text serialization (public-only and full forms)
//! - Certificates of membership for virtual-network admission

pub mod address;
pub mod com;
pub mod error;
pub mod identity;

pub use address::{Address, ADDRESS_LENGTH};
pub use com::{
    CertificateOfMembership, ComDecodeError, CredentialVerdict, Qualifier, ReservedQualifierId,
    SignerLookup, MAX_QUALIFIERS,
};
pub use error::{CryptoError, CryptoResult};
pub use identity::Identity;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 secret key size in bytes
pub const SECRET_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;
