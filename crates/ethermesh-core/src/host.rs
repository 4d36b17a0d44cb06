//! Host Callback Interface
//!
//! The node performs no I/O of its own. Sockets, tap devices, the clock,
//! and persistent state all live in the embedding host, which implements
//! [`NodeHost`]. Every callback receives the [`CallToken`] of the API call
//! that triggered it; a callback that re-enters the node must pass the same
//! token back so re-entrant work is attributed to the original call.

use std::net::SocketAddr;

use ethermesh_crypto::Address;

use crate::network::VirtualNetworkConfig;

/// Opaque re-entrancy token threaded through every re-entrant API call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CallToken(pub u64);

/// Kinds of persistent state objects the node asks the host to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateObjectType {
    /// Full secret identity, id `{0, 0}`
    IdentitySecret,
    /// Public identity, id `{address, 0}`
    IdentityPublic,
    /// Cached network configuration, id `{nwid, 0}`
    NetworkConfig,
}

/// Tap port lifecycle operations delivered to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualNetworkConfigOperation {
    /// Network joined and configured; bring the tap up
    Up,
    /// Configuration changed
    ConfigUpdate,
    /// Network is disabled but still joined
    Down,
    /// Network left or destroyed; tear the tap down
    Destroy,
}

/// Events posted to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Node constructed and ready
    Up,
    /// At least one upstream is reachable
    Online,
    /// No upstream reachable
    Offline,
    /// Node is shutting down
    Down,
    /// Diagnostic trace line
    Trace(String),
    /// Application-level datagram from a remote node
    UserMessage {
        source: Address,
        type_id: u64,
        payload: Vec<u8>,
    },
}

/// Capabilities the embedding host provides to the node
pub trait NodeHost: Send + Sync {
    /// Read a persistent state object; `None` when absent
    fn state_object_get(
        &self,
        token: CallToken,
        object_type: StateObjectType,
        id: [u64; 2],
    ) -> Option<Vec<u8>>;

    /// Write a persistent state object
    fn state_object_put(
        &self,
        token: CallToken,
        object_type: StateObjectType,
        id: [u64; 2],
        data: &[u8],
    );

    /// Delete a persistent state object
    fn state_object_delete(&self, token: CallToken, object_type: StateObjectType, id: [u64; 2]);

    /// Send a UDP datagram; `local_socket` of -1 means any socket
    fn wire_packet_send(
        &self,
        token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        data: &[u8],
        ttl: u32,
    ) -> bool;

    /// Deliver an Ethernet frame to the tap device of a network
    #[allow(clippy::too_many_arguments)]
    fn virtual_network_frame(
        &self,
        token: CallToken,
        nwid: u64,
        source_mac: u64,
        dest_mac: u64,
        ether_type: u16,
        vlan_id: u16,
        frame: &[u8],
    );

    /// Tap port lifecycle notification
    fn virtual_network_config(
        &self,
        token: CallToken,
        nwid: u64,
        op: VirtualNetworkConfigOperation,
        config: &VirtualNetworkConfig,
    );

    /// Veto a candidate physical path; the default permits everything
    fn path_check(
        &self,
        _token: CallToken,
        _address: Address,
        _local_socket: i64,
        _remote: SocketAddr,
    ) -> bool {
        true
    }

    /// Event delivery; `Online`/`Offline` are posted exactly once per
    /// transition
    fn post_event(&self, token: CallToken, event: Event);
}
