//! Embedded Network Controller Contract
//!
//! A node may host the controller for networks whose id carries its address.
//! The controller is handed a [`ControllerSender`] at init time and answers
//! config requests through it: chunked signed configs, revocations, and
//! error codes. The node implements the sender; the controller implements
//! [`NetworkController`].

use bytes::{Buf, BufMut};

use ethermesh_crypto::{Address, Identity};

use crate::network::NetworkConfig;

/// Controller-level error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcErrorCode {
    /// Network or member object does not exist
    ObjectNotFound,
    /// Unexpected controller-side failure
    InternalServerError,
    /// Member is not authorized on this network
    AccessDenied,
}

/// A credential revocation issued by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub id: u64,
    pub nwid: u64,
    pub target: Address,
    pub threshold: u64,
}

impl Revocation {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.id);
        buf.put_u64(self.nwid);
        self.target.append_to(buf);
        buf.put_u64(self.threshold);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 8 + 8 + ethermesh_crypto::ADDRESS_LENGTH + 8 {
            return None;
        }
        Some(Self {
            id: buf.get_u64(),
            nwid: buf.get_u64(),
            target: Address::read_from(buf).ok()?,
            threshold: buf.get_u64(),
        })
    }
}

/// Outward calls from an embedded controller to its hosting node
pub trait ControllerSender: Send + Sync {
    /// Deliver a network config to `dest` (locally installed when `dest` is
    /// the hosting node itself)
    fn nc_send_config(
        &self,
        nwid: u64,
        request_packet_id: u64,
        dest: Address,
        config: &NetworkConfig,
        legacy_format: bool,
    );

    /// Deliver a single revocation
    fn nc_send_revocation(&self, dest: Address, rev: &Revocation);

    /// Deliver an error for a config request; dropped when there is no
    /// request to answer and `dest` is remote
    fn nc_send_error(&self, nwid: u64, request_packet_id: u64, dest: Address, code: NcErrorCode);
}

/// An embedded network controller hosted by a node
pub trait NetworkController: Send + Sync {
    /// Called once when installed; hands over the node identity and sender
    fn init(&self, signing_identity: Identity, sender: std::sync::Arc<dyn ControllerSender>);

    /// Handle a config request from `from` for `nwid`
    fn request(&self, nwid: u64, from: Address, request_packet_id: u64, metadata: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_revocation_roundtrip() {
        let rev = Revocation {
            id: 42,
            nwid: 0xdeadbeef00000001,
            target: Address::from_u64(0x99),
            threshold: 123456,
        };
        let mut buf = BytesMut::new();
        rev.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert_eq!(Revocation::decode(&mut bytes), Some(rev));
    }

    #[test]
    fn test_revocation_short_input() {
        let mut bytes = bytes::Bytes::from_static(&[0u8; 10]);
        assert!(Revocation::decode(&mut bytes).is_none());
    }
}
