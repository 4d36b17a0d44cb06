//! Shared mock host for node integration tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use ethermesh_core::{
    CallToken, Event, NodeHost, StateObjectType, VirtualNetworkConfig,
    VirtualNetworkConfigOperation,
};
use ethermesh_crypto::Address;

/// A recorded outbound wire packet
pub struct SentPacket {
    pub local_socket: i64,
    pub remote: SocketAddr,
    pub data: Vec<u8>,
}

impl SentPacket {
    /// Verb byte of the overlay packet envelope
    pub fn verb(&self) -> u8 {
        self.data[18]
    }

    /// Destination address of the overlay packet envelope
    pub fn dest(&self) -> Address {
        Address::try_from_slice(&self.data[8..13]).unwrap()
    }
}

/// Host double that records every interaction with the node
#[derive(Default)]
pub struct MockHost {
    pub state: Mutex<HashMap<(StateObjectType, u64), Vec<u8>>>,
    pub events: Mutex<Vec<Event>>,
    pub sent: Mutex<Vec<SentPacket>>,
    pub config_ops: Mutex<Vec<(u64, VirtualNetworkConfigOperation)>>,
    pub frames: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // Identity objects are looked up without a concrete id at boot time, so
    // key them by type alone; network configs are per-nwid
    fn key(object_type: StateObjectType, id: [u64; 2]) -> (StateObjectType, u64) {
        match object_type {
            StateObjectType::NetworkConfig => (object_type, id[0]),
            _ => (object_type, 0),
        }
    }

    pub fn event_count(&self, wanted: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }

    pub fn sent_verbs(&self) -> Vec<u8> {
        self.sent.lock().iter().map(|p| p.verb()).collect()
    }
}

impl NodeHost for MockHost {
    fn state_object_get(
        &self,
        _token: CallToken,
        object_type: StateObjectType,
        id: [u64; 2],
    ) -> Option<Vec<u8>> {
        self.state.lock().get(&Self::key(object_type, id)).cloned()
    }

    fn state_object_put(
        &self,
        _token: CallToken,
        object_type: StateObjectType,
        id: [u64; 2],
        data: &[u8],
    ) {
        self.state
            .lock()
            .insert(Self::key(object_type, id), data.to_vec());
    }

    fn state_object_delete(&self, _token: CallToken, object_type: StateObjectType, id: [u64; 2]) {
        self.state.lock().remove(&Self::key(object_type, id));
    }

    fn wire_packet_send(
        &self,
        _token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        data: &[u8],
        _ttl: u32,
    ) -> bool {
        self.sent.lock().push(SentPacket {
            local_socket,
            remote,
            data: data.to_vec(),
        });
        true
    }

    fn virtual_network_frame(
        &self,
        _token: CallToken,
        nwid: u64,
        _source_mac: u64,
        _dest_mac: u64,
        _ether_type: u16,
        _vlan_id: u16,
        frame: &[u8],
    ) {
        self.frames.lock().push((nwid, frame.to_vec()));
    }

    fn virtual_network_config(
        &self,
        _token: CallToken,
        nwid: u64,
        op: VirtualNetworkConfigOperation,
        _config: &VirtualNetworkConfig,
    ) {
        self.config_ops.lock().push((nwid, op));
    }

    fn post_event(&self, _token: CallToken, event: Event) {
        self.events.lock().push(event);
    }
}
