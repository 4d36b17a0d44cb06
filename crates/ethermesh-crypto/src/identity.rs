//! Node Identity
//!
//! Every node owns exactly one Ed25519 signing keypair for its lifetime. The
//! node's 40-bit address is the leading bytes of a BLAKE3 hash of the public
//! key; key generation retries until the derived address is valid. Identities
//! serialize to two canonical text forms:
//!
//! - public: `aabbccddee:0:<64 hex public key>`
//! - secret: `aabbccddee:0:<64 hex public key>:<64 hex secret key>`
//!
//! The `0` field is the identity type (Ed25519 is the only type defined).

use ed25519_dalek::{Signature as Ed25519Sig, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::address::{hex_decode, hex_encode, Address};
use crate::error::{CryptoError, CryptoResult};
use crate::{PUBKEY_SIZE, SECRET_SIZE, SIGNATURE_SIZE};

/// A node identity: public key, derived address, and optionally the secret key
///
/// The secret key is zeroized on drop via ed25519-dalek's `zeroize` feature.
pub struct Identity {
    address: Address,
    public: VerifyingKey,
    secret: Option<SigningKey>,
}

impl Identity {
    /// Generate a new identity, retrying until the derived address is valid
    pub fn generate() -> Self {
        loop {
            let secret = SigningKey::generate(&mut OsRng);
            let public = secret.verifying_key();
            let address = derive_address(&public);
            if address.is_valid() {
                return Self {
                    address,
                    public,
                    secret: Some(secret),
                };
            }
        }
    }

    /// Reconstruct from a stored secret key
    pub fn from_secret_bytes(secret: [u8; SECRET_SIZE]) -> Self {
        let secret = SigningKey::from_bytes(&secret);
        let public = secret.verifying_key();
        Self {
            address: derive_address(&public),
            public,
            secret: Some(secret),
        }
    }

    /// Construct a public-only identity from public key bytes
    pub fn from_public_bytes(public: &[u8; PUBKEY_SIZE]) -> CryptoResult<Self> {
        let public =
            VerifyingKey::from_bytes(public).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self {
            address: derive_address(&public),
            public,
            secret: None,
        })
    }

    /// The derived 40-bit address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Public key bytes
    pub fn public_bytes(&self) -> [u8; PUBKEY_SIZE] {
        self.public.to_bytes()
    }

    /// True when the secret key is present
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign a message with the secret key
    pub fn sign(&self, message: &[u8]) -> CryptoResult<[u8; SIGNATURE_SIZE]> {
        let secret = self.secret.as_ref().ok_or(CryptoError::MissingSecretKey)?;
        Ok(secret.sign(message).to_bytes())
    }

    /// Verify a signature made by this identity
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        if signature.len() != SIGNATURE_SIZE {
            return false;
        }
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(signature);
        self.public
            .verify(message, &Ed25519Sig::from_bytes(&sig))
            .is_ok()
    }

    /// Public-only copy of this identity
    pub fn public_clone(&self) -> Self {
        Self {
            address: self.address,
            public: self.public,
            secret: None,
        }
    }

    /// Canonical text form; `include_secret` selects the full form
    pub fn to_text(&self, include_secret: bool) -> CryptoResult<String> {
        let mut s = format!(
            "{}:0:{}",
            self.address.to_hex(),
            hex_encode(&self.public.to_bytes())
        );
        if include_secret {
            let secret = self.secret.as_ref().ok_or(CryptoError::MissingSecretKey)?;
            s.push(':');
            s.push_str(&hex_encode(&secret.to_bytes()));
        }
        Ok(s)
    }

    /// Parse either canonical text form
    pub fn from_text(s: &str) -> CryptoResult<Self> {
        let fields: Vec<&str> = s.trim().split(':').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(CryptoError::SerializationError(
                "identity field count".into(),
            ));
        }
        if fields[1] != "0" {
            return Err(CryptoError::SerializationError(
                "unknown identity type".into(),
            ));
        }

        let claimed = Address::from_hex(fields[0])?;
        let public = hex_decode(fields[2])?;
        if public.len() != PUBKEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBKEY_SIZE,
                actual: public.len(),
            });
        }
        let mut pub_bytes = [0u8; PUBKEY_SIZE];
        pub_bytes.copy_from_slice(&public);

        let id = if fields.len() == 4 {
            let secret = hex_decode(fields[3])?;
            if secret.len() != SECRET_SIZE {
                return Err(CryptoError::InvalidKeyLength {
                    expected: SECRET_SIZE,
                    actual: secret.len(),
                });
            }
            let mut sec_bytes = [0u8; SECRET_SIZE];
            sec_bytes.copy_from_slice(&secret);
            let id = Self::from_secret_bytes(sec_bytes);
            if id.public_bytes() != pub_bytes {
                return Err(CryptoError::InvalidAddress(
                    "public key does not match secret".into(),
                ));
            }
            id
        } else {
            Self::from_public_bytes(&pub_bytes)?
        };

        if id.address != claimed {
            return Err(CryptoError::InvalidAddress(format!(
                "claimed {} but key derives {}",
                claimed, id.address
            )));
        }
        Ok(id)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            address: self.address,
            public: self.public,
            secret: self
                .secret
                .as_ref()
                .map(|s| SigningKey::from_bytes(&s.to_bytes())),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.public == other.public
    }
}

impl Eq for Identity {}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({})", self.address)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

fn derive_address(public: &VerifyingKey) -> Address {
    let hash = blake3::hash(&public.to_bytes());
    let mut bytes = [0u8; crate::ADDRESS_LENGTH];
    bytes.copy_from_slice(&hash.as_bytes()[..crate::ADDRESS_LENGTH]);
    Address::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_is_valid() {
        let id = Identity::generate();
        assert!(id.address().is_valid());
    }

    #[test]
    fn test_address_is_deterministic() {
        let id = Identity::generate();
        let again = Identity::from_public_bytes(&id.public_bytes()).unwrap();
        assert_eq!(id.address(), again.address());
    }

    #[test]
    fn test_public_text_roundtrip() {
        let id = Identity::generate();
        let text = id.to_text(false).unwrap();
        let parsed = Identity::from_text(&text).unwrap();
        assert_eq!(parsed, id);
        assert!(!parsed.has_secret());
    }

    #[test]
    fn test_secret_text_roundtrip() {
        let id = Identity::generate();
        let text = id.to_text(true).unwrap();
        let parsed = Identity::from_text(&text).unwrap();
        assert_eq!(parsed, id);
        assert!(parsed.has_secret());
        assert_eq!(parsed.to_text(true).unwrap(), text);
    }

    #[test]
    fn test_tampered_address_rejected() {
        let id = Identity::generate();
        let text = id.to_text(false).unwrap();
        let mut fields: Vec<String> = text.split(':').map(String::from).collect();
        fields[0] = "0000000001".into();
        assert!(Identity::from_text(&fields.join(":")).is_err());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let sig = id.sign(b"ethermesh").unwrap();
        assert!(id.verify(b"ethermesh", &sig));
        assert!(!id.verify(b"tampered", &sig));
    }

    #[test]
    fn test_public_only_cannot_sign() {
        let id = Identity::generate().public_clone();
        assert!(id.sign(b"x").is_err());
    }
}
