//! Fault Tracing
//!
//! Dropped packets and rejected credentials are never surfaced as errors to
//! the embedding host; they are traced here instead. Each fault is logged and
//! forwarded as an [`Event::Trace`] line so hosts can expose diagnostics
//! without linking a logging framework.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use ethermesh_crypto::Address;

use crate::host::{CallToken, Event, NodeHost};

/// Diagnostic fault sink
pub struct Trace {
    host: Arc<dyn NodeHost>,
}

impl Trace {
    pub fn new(host: Arc<dyn NodeHost>) -> Self {
        Self { host }
    }

    fn emit(&self, token: CallToken, line: String) {
        debug!("{}", line);
        self.host.post_event(token, Event::Trace(line));
    }

    /// A wire packet was dropped during parse or validation
    pub fn incoming_packet_dropped(&self, token: CallToken, from: SocketAddr, reason: &str) {
        self.emit(token, format!("dropped packet from {}: {}", from, reason));
    }

    /// A membership credential failed verification
    pub fn credential_rejected(&self, token: CallToken, nwid: u64, from: Address, reason: &str) {
        self.emit(
            token,
            format!(
                "rejected credential from {} for network {:016x}: {}",
                from, nwid, reason
            ),
        );
    }

    /// A frame was blocked by the membership gate
    pub fn frame_dropped(&self, token: CallToken, nwid: u64, from: Address, reason: &str) {
        self.emit(
            token,
            format!(
                "dropped frame from {} on network {:016x}: {}",
                from, nwid, reason
            ),
        );
    }

    /// A network left or was destroyed
    pub fn network_destroyed(&self, token: CallToken, nwid: u64) {
        self.emit(token, format!("network {:016x} destroyed", nwid));
    }
}
