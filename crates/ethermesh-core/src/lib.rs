//! Ethermesh Node Runtime
//!
//! The embeddable core of the ethermesh peer-to-peer virtual Ethernet
//! overlay:
//! - Host callback contract (time, I/O, state persistence, events)
//! - Per-network membership state and credential handling
//! - Peer/path directory with upstream selection
//! - The node orchestrator: packet/frame routing and periodic maintenance
//! - Hooks for an embedded network controller

pub mod error;
pub mod host;
pub mod multicaster;
pub mod netconf;
pub mod network;
pub mod node;
pub mod path;
pub mod peer;
pub mod query;
pub mod self_awareness;
pub mod switch;
pub mod topology;
pub mod trace;

pub use error::{CoreError, CoreResult, ResultCode};
pub use host::{CallToken, Event, NodeHost, StateObjectType, VirtualNetworkConfigOperation};
pub use netconf::{ControllerSender, NcErrorCode, NetworkController, Revocation};
pub use network::{NetworkStatus, VirtualNetworkConfig};
pub use node::Node;
pub use query::{NodeStatus, PathInfo, PeerInfo, PeerList, VirtualNetworkList};
pub use topology::{PeerRole, Root, Topology, TrustedPath, World};

/// Protocol version advertised in HELLO
pub const PROTOCOL_VERSION: u8 = 1;

/// Node software version advertised in HELLO
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;
pub const VERSION_REVISION: u16 = 0;

/// How often the ping-check branch of the periodic loop runs (ms)
pub const PING_CHECK_INTERVAL: u64 = 62_000;

/// Direct-path keepalive period per peer (ms)
pub const PEER_PING_PERIOD: u64 = 60_000;

/// A path with no inbound traffic for this long is expired (ms)
pub const PEER_PATH_EXPIRATION: u64 = 243_000;

/// A peer silent for this long is no longer "active" (ms)
pub const PEER_ACTIVITY_TIMEOUT: u64 = 500_000;

/// Peers with no alive paths are dropped from memory after this long (ms)
pub const PEER_IN_MEMORY_EXPIRATION: u64 = 600_000;

/// Network configs older than this are re-requested (ms)
pub const NETWORK_AUTOCONF_DELAY: u64 = 60_000;

/// Housekeeping cadence for cache cleanup (ms)
pub const HOUSEKEEPING_PERIOD: u64 = 120_000;

/// Floor on the deadline returned by the periodic driver (ms)
pub const TIMER_GRANULARITY: u64 = 500;

/// Default UDP payload MTU for outbound packets
pub const UDP_DEFAULT_PAYLOAD_MTU: usize = 1_444;

/// Delay between WHOIS retransmissions (ms)
pub const WHOIS_RETRY_DELAY: u64 = 500;

/// WHOIS attempts before giving up on an address
pub const MAX_WHOIS_RETRIES: u32 = 4;

/// How long remembered multicast group members stay valid (ms)
pub const MULTICAST_LIKE_EXPIRE: u64 = 600_000;

/// How often our membership credential is re-pushed to network peers (ms)
pub const CREDENTIAL_PUSH_INTERVAL: u64 = 60_000;
