//! Query Result Descriptors
//!
//! Owned snapshots returned by the node's query methods. Ownership crosses
//! the API boundary: the caller keeps the returned value and releases it by
//! dropping it.

use std::net::SocketAddr;

use ethermesh_crypto::Address;

use crate::network::VirtualNetworkConfig;
use crate::topology::PeerRole;

/// One physical path of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub remote: SocketAddr,
    pub last_send: u64,
    pub last_receive: u64,
    pub trusted_path_id: u64,
    pub link_quality: u8,
    pub expired: bool,
    pub preferred: bool,
}

/// One known peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: Address,
    /// -1 when the remote version is unknown
    pub version_major: i32,
    pub version_minor: i32,
    pub version_rev: i32,
    pub latency: u16,
    pub role: PeerRole,
    pub paths: Vec<PathInfo>,
}

/// Snapshot of all known peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    pub peers: Vec<PeerInfo>,
}

/// Snapshot of all joined networks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualNetworkList {
    pub networks: Vec<VirtualNetworkConfig>,
}

/// Point-in-time node status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: Address,
    pub public_identity: String,
    pub secret_identity: String,
    pub online: bool,
}
