//! Certificate of Membership
//!
//! A COM is a sorted list of up to eight `(id, value, max_delta)` qualifier
//! tuples, a signer address, and a detached Ed25519 signature. Two
//! certificates "agree" when every qualifier in one is matched in the other
//! within that qualifier's maximum delta; agreement is checked directionally
//! by each endpoint against its peer's certificate.
//!
//! The timestamp qualifier is the fundamental admission criterion: members of
//! a private network must refresh their certificate often enough to stay
//! within the network's timestamp max-delta of every peer they talk to.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::address::Address;
use crate::error::{CryptoError, CryptoResult};
use crate::identity::Identity;
use crate::{ADDRESS_LENGTH, SIGNATURE_SIZE};

/// Maximum number of qualifiers in one certificate
pub const MAX_QUALIFIERS: usize = 8;

const SERIALIZED_TYPE: u8 = 1;

/// One `(id, value, max_delta)` tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    pub id: u64,
    pub value: u64,
    pub max_delta: u64,
}

/// Qualifier ids reserved for standard fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ReservedQualifierId {
    /// Timestamp of certificate issue
    Timestamp = 0,
    /// Network id for which the certificate was issued (exact match)
    NetworkId = 1,
    /// Address the certificate was issued to (unconstrained in agreement)
    IssuedTo = 2,
}

/// Decode failures, tagged so callers can discard without aborting
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ComDecodeError {
    /// Leading type byte is not a known credential type
    #[error("unrecognized credential type")]
    InvalidType,
    /// Qualifier ids out of order, or data truncated
    #[error("bad certificate encoding")]
    BadEncoding,
    /// More than the maximum number of qualifiers
    #[error("too many qualifiers")]
    Overflow,
}

/// Verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum CredentialVerdict {
    /// Signature is valid
    Ok = 0,
    /// Signer identity unknown; a lookup has been requested
    WaitingForWhois = 1,
    /// Unsigned, or the signature does not verify
    Bad = -1,
}

/// Directory capability used to resolve a certificate's signer
pub trait SignerLookup {
    /// Known public identity for an address
    fn find_identity(&self, address: Address) -> Option<Identity>;

    /// Invoked when a signer is unknown so the transport can resolve it
    fn request_identity(&self, _address: Address) {}
}

/// Certificate of network membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateOfMembership {
    qualifiers: Vec<Qualifier>,
    signed_by: Address,
    #[serde(with = "BigArray")]
    signature: [u8; SIGNATURE_SIZE],
}

impl Default for CertificateOfMembership {
    fn default() -> Self {
        Self {
            qualifiers: Vec::new(),
            signed_by: Address::NIL,
            signature: [0u8; SIGNATURE_SIZE],
        }
    }
}

impl CertificateOfMembership {
    /// Create from the fields required on every network
    pub fn new(timestamp: u64, timestamp_max_delta: u64, nwid: u64, issued_to: Address) -> Self {
        Self {
            qualifiers: vec![
                Qualifier {
                    id: ReservedQualifierId::Timestamp as u64,
                    value: timestamp,
                    max_delta: timestamp_max_delta,
                },
                Qualifier {
                    id: ReservedQualifierId::NetworkId as u64,
                    value: nwid,
                    max_delta: 0,
                },
                Qualifier {
                    id: ReservedQualifierId::IssuedTo as u64,
                    value: issued_to.to_u64(),
                    max_delta: u64::MAX,
                },
            ],
            signed_by: Address::NIL,
            signature: [0u8; SIGNATURE_SIZE],
        }
    }

    /// True if the certificate carries any qualifiers
    pub fn is_populated(&self) -> bool {
        !self.qualifiers.is_empty()
    }

    /// Timestamp qualifier value, 0 if absent
    pub fn timestamp(&self) -> u64 {
        self.qualifier_value(ReservedQualifierId::Timestamp as u64)
            .unwrap_or(0)
    }

    /// Network id qualifier value, 0 if absent
    pub fn network_id(&self) -> u64 {
        self.qualifier_value(ReservedQualifierId::NetworkId as u64)
            .unwrap_or(0)
    }

    /// Address the certificate was issued to, nil if absent
    pub fn issued_to(&self) -> Address {
        Address::from_u64(
            self.qualifier_value(ReservedQualifierId::IssuedTo as u64)
                .unwrap_or(0),
        )
    }

    /// Address that signed this certificate, nil if unsigned
    pub fn signed_by(&self) -> Address {
        self.signed_by
    }

    /// True once signed
    pub fn is_signed(&self) -> bool {
        !self.signed_by.is_nil()
    }

    fn qualifier_value(&self, id: u64) -> Option<u64> {
        self.qualifiers
            .iter()
            .find(|q| q.id == id)
            .map(|q| q.value)
    }

    /// Add or update a qualifier, keeping sort order by id
    ///
    /// Any existing signature is invalidated.
    pub fn set_qualifier(&mut self, id: u64, value: u64, max_delta: u64) -> CryptoResult<()> {
        self.signed_by = Address::NIL;
        self.signature = [0u8; SIGNATURE_SIZE];

        match self.qualifiers.binary_search_by_key(&id, |q| q.id) {
            Ok(i) => {
                self.qualifiers[i].value = value;
                self.qualifiers[i].max_delta = max_delta;
            }
            Err(i) => {
                if self.qualifiers.len() >= MAX_QUALIFIERS {
                    return Err(CryptoError::SerializationError(
                        "qualifier limit reached".into(),
                    ));
                }
                self.qualifiers.insert(
                    i,
                    Qualifier {
                        id,
                        value,
                        max_delta,
                    },
                );
            }
        }
        Ok(())
    }

    /// Check whether `other` satisfies every qualifier in this certificate
    ///
    /// For each of our qualifiers, `other` must carry the same id with a
    /// value within our max-delta (magnitude of difference, no wraparound).
    /// Qualifiers present only in `other` are ignored. The relation is not
    /// symmetric.
    pub fn agrees_with(&self, other: &CertificateOfMembership) -> bool {
        let mut theirs = other.qualifiers.iter().peekable();
        for mine in &self.qualifiers {
            while theirs.peek().map_or(false, |q| q.id < mine.id) {
                theirs.next();
            }
            match theirs.peek() {
                Some(q) if q.id == mine.id => {
                    let diff = mine.value.max(q.value) - mine.value.min(q.value);
                    if diff > mine.max_delta {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    // Canonical byte image covered by the signature: type tag, qualifier
    // count, sorted triples, signer address.
    fn signing_image(&self, signer: Address) -> BytesMut {
        let mut buf = BytesMut::with_capacity(3 + self.qualifiers.len() * 24 + ADDRESS_LENGTH);
        buf.put_u8(SERIALIZED_TYPE);
        buf.put_u16(self.qualifiers.len() as u16);
        for q in &self.qualifiers {
            buf.put_u64(q.id);
            buf.put_u64(q.value);
            buf.put_u64(q.max_delta);
        }
        signer.append_to(&mut buf);
        buf
    }

    /// Sign with an identity holding a secret key
    pub fn sign(&mut self, with: &Identity) -> CryptoResult<()> {
        let image = self.signing_image(with.address());
        self.signature = with.sign(&image)?;
        self.signed_by = with.address();
        Ok(())
    }

    /// Verify the signature, resolving the signer through `signers`
    pub fn verify(&self, signers: &dyn SignerLookup) -> CredentialVerdict {
        if !self.is_signed() {
            return CredentialVerdict::Bad;
        }
        let signer = match signers.find_identity(self.signed_by) {
            Some(id) => id,
            None => {
                signers.request_identity(self.signed_by);
                return CredentialVerdict::WaitingForWhois;
            }
        };
        let image = self.signing_image(self.signed_by);
        if signer.verify(&image, &self.signature) {
            CredentialVerdict::Ok
        } else {
            CredentialVerdict::Bad
        }
    }

    /// Append the wire form to a buffer
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(SERIALIZED_TYPE);
        buf.put_u16(self.qualifiers.len() as u16);
        for q in &self.qualifiers {
            buf.put_u64(q.id);
            buf.put_u64(q.value);
            buf.put_u64(q.max_delta);
        }
        self.signed_by.append_to(buf);
        if self.is_signed() {
            buf.put_slice(&self.signature);
        }
    }

    /// Decode the wire form
    ///
    /// Qualifier ids must be non-decreasing; an unsigned certificate carries
    /// no signature bytes.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ComDecodeError> {
        if buf.remaining() < 3 {
            return Err(ComDecodeError::BadEncoding);
        }
        if buf.get_u8() != SERIALIZED_TYPE {
            return Err(ComDecodeError::InvalidType);
        }

        let count = buf.get_u16() as usize;
        if count > MAX_QUALIFIERS {
            return Err(ComDecodeError::Overflow);
        }
        if buf.remaining() < count * 24 + ADDRESS_LENGTH {
            return Err(ComDecodeError::BadEncoding);
        }

        let mut qualifiers = Vec::with_capacity(count);
        let mut last_id = 0u64;
        for i in 0..count {
            let id = buf.get_u64();
            if i > 0 && id < last_id {
                return Err(ComDecodeError::BadEncoding);
            }
            last_id = id;
            qualifiers.push(Qualifier {
                id,
                value: buf.get_u64(),
                max_delta: buf.get_u64(),
            });
        }

        let signed_by =
            Address::read_from(buf).map_err(|_| ComDecodeError::BadEncoding)?;

        let mut signature = [0u8; SIGNATURE_SIZE];
        if !signed_by.is_nil() {
            if buf.remaining() < SIGNATURE_SIZE {
                return Err(ComDecodeError::BadEncoding);
            }
            buf.copy_to_slice(&mut signature);
        }

        Ok(Self {
            qualifiers,
            signed_by,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct OneSigner(Identity);

    impl SignerLookup for OneSigner {
        fn find_identity(&self, address: Address) -> Option<Identity> {
            (address == self.0.address()).then(|| self.0.public_clone())
        }
    }

    struct NobodyHome;

    impl SignerLookup for NobodyHome {
        fn find_identity(&self, _address: Address) -> Option<Identity> {
            None
        }
    }

    fn encode_to_bytes(com: &CertificateOfMembership) -> Bytes {
        let mut buf = BytesMut::new();
        com.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_agreement_within_timestamp_delta() {
        let member = Address::from_u64(0x01);
        let a = CertificateOfMembership::new(1000, 1000, 0xdeadbeef00000001, member);
        let b = CertificateOfMembership::new(1500, 1000, 0xdeadbeef00000001, member);
        assert!(a.agrees_with(&b));
        assert!(b.agrees_with(&a));
    }

    #[test]
    fn test_agreement_outside_timestamp_delta() {
        let member = Address::from_u64(0x01);
        let a = CertificateOfMembership::new(1000, 1000, 0xdeadbeef00000001, member);
        let b = CertificateOfMembership::new(3000, 1000, 0xdeadbeef00000001, member);
        assert!(!a.agrees_with(&b));
    }

    #[test]
    fn test_agreement_requires_same_network() {
        let member = Address::from_u64(0x01);
        let a = CertificateOfMembership::new(1000, 1000, 0xdeadbeef00000001, member);
        let b = CertificateOfMembership::new(1000, 1000, 0xdeadbeef00000002, member);
        assert!(!a.agrees_with(&b));
    }

    #[test]
    fn test_agreement_ignores_extra_qualifiers_in_other() {
        let member = Address::from_u64(0x01);
        let a = CertificateOfMembership::new(1000, 1000, 7, member);
        let mut b = CertificateOfMembership::new(1000, 1000, 7, member);
        b.set_qualifier(1000, 42, 0).unwrap();
        assert!(a.agrees_with(&b));
        assert!(!b.agrees_with(&a));
    }

    #[test]
    fn test_issued_to_is_unconstrained() {
        let a = CertificateOfMembership::new(1000, 1000, 7, Address::from_u64(0x01));
        let b = CertificateOfMembership::new(1000, 1000, 7, Address::from_u64(0x02));
        assert!(a.agrees_with(&b));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let id = Identity::generate();
        let mut com =
            CertificateOfMembership::new(123456, 5000, 0xdeadbeef00000001, Address::from_u64(9));
        com.sign(&id).unwrap();

        let mut bytes = encode_to_bytes(&com);
        let decoded = CertificateOfMembership::decode(&mut bytes).unwrap();
        assert_eq!(decoded, com);
    }

    #[test]
    fn test_unsigned_roundtrip() {
        let com = CertificateOfMembership::new(1, 1, 2, Address::from_u64(3));
        let mut bytes = encode_to_bytes(&com);
        let decoded = CertificateOfMembership::decode(&mut bytes).unwrap();
        assert_eq!(decoded, com);
        assert!(!decoded.is_signed());
    }

    #[test]
    fn test_decode_rejects_descending_ids() {
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u16(2);
        // id 2 then id 1: out of order
        for id in [2u64, 1u64] {
            buf.put_u64(id);
            buf.put_u64(0);
            buf.put_u64(0);
        }
        Address::NIL.append_to(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(
            CertificateOfMembership::decode(&mut bytes),
            Err(ComDecodeError::BadEncoding)
        );
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        let mut bytes = Bytes::from_static(&[9u8, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            CertificateOfMembership::decode(&mut bytes),
            Err(ComDecodeError::InvalidType)
        );
    }

    #[test]
    fn test_decode_rejects_too_many_qualifiers() {
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u16((MAX_QUALIFIERS + 1) as u16);
        let mut bytes = buf.freeze();
        assert_eq!(
            CertificateOfMembership::decode(&mut bytes),
            Err(ComDecodeError::Overflow)
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = Identity::generate();
        let mut com =
            CertificateOfMembership::new(1000, 1000, 7, Address::from_u64(0x01));
        com.sign(&signer).unwrap();

        assert_eq!(
            com.verify(&OneSigner(signer.clone())),
            CredentialVerdict::Ok
        );
        assert_eq!(com.verify(&NobodyHome), CredentialVerdict::WaitingForWhois);
    }

    #[test]
    fn test_mutation_after_signing_invalidates() {
        let signer = Identity::generate();
        let mut com =
            CertificateOfMembership::new(1000, 1000, 7, Address::from_u64(0x01));
        com.sign(&signer).unwrap();
        com.set_qualifier(ReservedQualifierId::Timestamp as u64, 2000, 1000)
            .unwrap();
        assert!(!com.is_signed());
        assert_eq!(com.verify(&OneSigner(signer)), CredentialVerdict::Bad);
    }

    #[test]
    fn test_tampered_signature_is_bad() {
        let signer = Identity::generate();
        let mut com =
            CertificateOfMembership::new(1000, 1000, 7, Address::from_u64(0x01));
        com.sign(&signer).unwrap();

        let mut bytes = encode_to_bytes(&com);
        let mut raw = bytes.to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        bytes = Bytes::from(raw);
        let tampered = CertificateOfMembership::decode(&mut bytes).unwrap();
        assert_eq!(
            tampered.verify(&OneSigner(signer)),
            CredentialVerdict::Bad
        );
    }
}
