//! Node Addresses
//!
//! A 40-bit identifier derived from a node's public key. Addresses with a
//! 0xff first byte are reserved and the all-zero address is nil; neither may
//! identify a real node. The top 40 bits of a network id are the address of
//! the controller that issued that network.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Address length in bytes (40 bits)
pub const ADDRESS_LENGTH: usize = 5;

const ADDRESS_MASK: u64 = 0xff_ffff_ffff;

/// A 40-bit node address
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Address(u64);

impl Address {
    /// The nil address
    pub const NIL: Address = Address(0);

    /// Create from an integer, keeping the low 40 bits
    pub fn from_u64(v: u64) -> Self {
        Self(v & ADDRESS_MASK)
    }

    /// Create from raw big-endian bytes
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        let mut v = 0u64;
        for b in bytes {
            v = (v << 8) | u64::from(b);
        }
        Self(v)
    }

    /// Try to create from a slice
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != ADDRESS_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: ADDRESS_LENGTH,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(slice);
        Ok(Self::from_bytes(bytes))
    }

    /// Controller address embedded in a network id (top 40 bits)
    pub fn from_network_id(nwid: u64) -> Self {
        Self(nwid >> 24)
    }

    /// Integer form
    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Big-endian byte form
    pub fn to_bytes(self) -> [u8; ADDRESS_LENGTH] {
        [
            (self.0 >> 32) as u8,
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        ]
    }

    /// True for the nil (all-zero) address
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// True when the first byte is the reserved 0xff prefix
    pub fn is_reserved(self) -> bool {
        (self.0 >> 32) == 0xff
    }

    /// Nil and reserved addresses never identify a node
    pub fn is_valid(self) -> bool {
        !self.is_nil() && !self.is_reserved()
    }

    /// Append the 5-byte form to a buffer
    pub fn append_to(self, buf: &mut impl BufMut) {
        buf.put_slice(&self.to_bytes());
    }

    /// Read a 5-byte address from a buffer
    pub fn read_from(buf: &mut impl Buf) -> CryptoResult<Self> {
        if buf.remaining() < ADDRESS_LENGTH {
            return Err(CryptoError::SerializationError(
                "short read for address".into(),
            ));
        }
        let mut bytes = [0u8; ADDRESS_LENGTH];
        buf.copy_to_slice(&mut bytes);
        Ok(Self::from_bytes(bytes))
    }

    /// Zero-padded lowercase hex form
    pub fn to_hex(self) -> String {
        format!("{:010x}", self.0)
    }

    /// Parse from the 10-digit hex form
    pub fn from_hex(hex: &str) -> CryptoResult<Self> {
        if hex.len() != ADDRESS_LENGTH * 2 {
            return Err(CryptoError::SerializationError(
                "invalid address hex length".into(),
            ));
        }
        let v = u64::from_str_radix(hex, 16)
            .map_err(|_| CryptoError::SerializationError("invalid address hex".into()))?;
        Ok(Self(v))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Helper functions shared by the identity text forms
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn hex_decode(hex: &str) -> CryptoResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(CryptoError::SerializationError("Invalid hex length".into()));
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| CryptoError::SerializationError("Invalid hex character".into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_masks_to_40_bits() {
        let a = Address::from_u64(0x1234_56789a_bcde);
        assert_eq!(a.to_u64(), 0x56_789a_bcde);
    }

    #[test]
    fn test_address_byte_roundtrip() {
        let a = Address::from_u64(0xdead_beef_01);
        assert_eq!(Address::from_bytes(a.to_bytes()), a);
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let a = Address::from_u64(0x01_0203_0405);
        assert_eq!(a.to_hex(), "0102030405");
        assert_eq!(Address::from_hex("0102030405").unwrap(), a);
    }

    #[test]
    fn test_reserved_and_nil() {
        assert!(!Address::NIL.is_valid());
        assert!(!Address::from_u64(0xff_0000_0001).is_valid());
        assert!(Address::from_u64(0xfe_0000_0001).is_valid());
    }

    #[test]
    fn test_controller_address_from_network_id() {
        let nwid = 0xdeadbeef00000001u64;
        assert_eq!(Address::from_network_id(nwid).to_u64(), nwid >> 24);
        assert_eq!(Address::from_network_id(nwid).to_hex(), "deadbeef00");
    }
}
