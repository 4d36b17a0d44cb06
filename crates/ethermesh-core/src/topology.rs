//! Peer / Topology Directory
//!
//! Address-keyed directory of known peers plus the upstream roster: one
//! "planet" world shared by every node and zero or more user-federated
//! "moon" worlds. Also owns the trusted-path table used to bypass encryption
//! on physical segments the operator declares safe.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use ethermesh_crypto::{Address, Identity};

use crate::peer::Peer;
use crate::PEER_IN_MEMORY_EXPIRATION;

/// Role of a peer in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Ordinary peer
    Leaf,
    /// Root of a user-federated moon
    Moon,
    /// Root of the planet
    Planet,
}

/// One root server of a world: its address and stable physical endpoints
#[derive(Debug, Clone)]
pub struct Root {
    pub address: Address,
    pub identity: Option<Identity>,
    pub stable_endpoints: Vec<SocketAddr>,
}

/// A federation of root servers (the planet, or a moon)
#[derive(Debug, Clone)]
pub struct World {
    pub id: u64,
    pub timestamp: u64,
    pub roots: Vec<Root>,
}

impl World {
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            timestamp: 0,
            roots: Vec::new(),
        }
    }
}

/// One CIDR→trust-id mapping for encryption bypass on trusted segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedPath {
    pub network: IpAddr,
    pub prefix: u8,
    pub trust_id: u64,
}

impl TrustedPath {
    /// Prefix match against a remote address; families must agree
    pub fn contains(&self, addr: &IpAddr) -> bool {
        fn prefix_eq(a: &[u8], b: &[u8], bits: u8) -> bool {
            let full = usize::from(bits / 8);
            if a[..full] != b[..full] {
                return false;
            }
            let rem = bits % 8;
            if rem == 0 {
                return true;
            }
            let mask = 0xffu8 << (8 - rem);
            (a[full] & mask) == (b[full] & mask)
        }
        match (self.network, addr) {
            (IpAddr::V4(n), IpAddr::V4(a)) if self.prefix <= 32 => {
                prefix_eq(&n.octets(), &a.octets(), self.prefix)
            }
            (IpAddr::V6(n), IpAddr::V6(a)) if self.prefix <= 128 => {
                prefix_eq(&n.octets(), &a.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

/// Directory of peers, upstream worlds, and trusted paths
pub struct Topology {
    identity: Identity,
    peers: RwLock<HashMap<Address, Arc<Peer>>>,
    planet: RwLock<World>,
    moons: RwLock<Vec<World>>,
    // Moons added by seed address before their world definition is known
    pending_moon_seeds: RwLock<Vec<(u64, Address)>>,
    trusted_paths: RwLock<Vec<TrustedPath>>,
}

impl Topology {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            peers: RwLock::new(HashMap::new()),
            planet: RwLock::new(World::empty(0)),
            moons: RwLock::new(Vec::new()),
            pending_moon_seeds: RwLock::new(Vec::new()),
            trusted_paths: RwLock::new(Vec::new()),
        }
    }

    /// Known peer for an address
    pub fn get_peer(&self, address: Address) -> Option<Arc<Peer>> {
        self.peers.read().get(&address).cloned()
    }

    /// Add a peer (or return the existing entry for its address)
    pub fn add_peer(&self, identity: Identity) -> Arc<Peer> {
        let address = identity.address();
        let mut peers = self.peers.write();
        peers
            .entry(address)
            .or_insert_with(|| {
                debug!(peer = %address, "new peer");
                Arc::new(Peer::new(identity))
            })
            .clone()
    }

    /// Known public identity for an address (peers, then world roots)
    pub fn identity_of(&self, address: Address) -> Option<Identity> {
        if address == self.identity.address() {
            return Some(self.identity.public_clone());
        }
        if let Some(peer) = self.get_peer(address) {
            return Some(peer.identity().public_clone());
        }
        let find_root = |world: &World| {
            world
                .roots
                .iter()
                .find(|r| r.address == address)
                .and_then(|r| r.identity.clone())
        };
        if let Some(id) = find_root(&self.planet.read()) {
            return Some(id);
        }
        self.moons.read().iter().find_map(find_root)
    }

    /// Snapshot of all peers, sorted by address
    pub fn all_peers(&self) -> Vec<(Address, Arc<Peer>)> {
        let mut out: Vec<(Address, Arc<Peer>)> = self
            .peers
            .read()
            .iter()
            .map(|(a, p)| (*a, p.clone()))
            .collect();
        out.sort_by_key(|(a, _)| *a);
        out
    }

    /// Replace the planet world definition
    pub fn set_planet(&self, world: World) {
        *self.planet.write() = world;
    }

    pub fn planet(&self) -> World {
        self.planet.read().clone()
    }

    pub fn moons(&self) -> Vec<World> {
        self.moons.read().clone()
    }

    /// Install a full moon world definition
    pub fn add_moon_world(&self, world: World) {
        self.pending_moon_seeds.write().retain(|(id, _)| *id != world.id);
        let mut moons = self.moons.write();
        if let Some(existing) = moons.iter_mut().find(|m| m.id == world.id) {
            if world.timestamp >= existing.timestamp {
                *existing = world;
            }
        } else {
            moons.push(world);
        }
    }

    /// Add a moon by seed address; the seed is contacted via WHOIS until its
    /// world definition arrives
    pub fn add_moon(&self, moon_id: u64, seed: Address) {
        if self.moons.read().iter().any(|m| m.id == moon_id) {
            return;
        }
        let mut pending = self.pending_moon_seeds.write();
        if !pending.iter().any(|(id, a)| *id == moon_id && *a == seed) {
            pending.push((moon_id, seed));
        }
    }

    /// Remove a moon and any pending seed for it
    pub fn remove_moon(&self, moon_id: u64) {
        self.moons.write().retain(|m| m.id != moon_id);
        self.pending_moon_seeds.write().retain(|(id, _)| *id != moon_id);
    }

    /// Upstream contact map: address → stable endpoints
    ///
    /// Includes planet roots, moon roots, and pending moon seeds (with no
    /// endpoints; those can only be resolved by WHOIS through other peers).
    pub fn upstreams_to_contact(&self) -> HashMap<Address, Vec<SocketAddr>> {
        let mut out: HashMap<Address, Vec<SocketAddr>> = HashMap::new();
        let me = self.identity.address();
        let mut add_world = |world: &World| {
            for root in &world.roots {
                if root.address != me {
                    out.entry(root.address)
                        .or_default()
                        .extend(root.stable_endpoints.iter().copied());
                }
            }
        };
        add_world(&self.planet.read());
        for moon in self.moons.read().iter() {
            add_world(moon);
        }
        for (_, seed) in self.pending_moon_seeds.read().iter() {
            if *seed != me {
                out.entry(*seed).or_default();
            }
        }
        out
    }

    /// Best upstream: the alive upstream peer heard from most recently
    pub fn best_upstream(&self) -> Option<Arc<Peer>> {
        let upstreams = self.upstreams_to_contact();
        let peers = self.peers.read();
        upstreams
            .keys()
            .filter_map(|a| peers.get(a))
            .max_by_key(|p| p.last_receive())
            .cloned()
    }

    /// Role of an address in the current topology
    pub fn role(&self, address: Address) -> PeerRole {
        if self.planet.read().roots.iter().any(|r| r.address == address) {
            return PeerRole::Planet;
        }
        if self
            .moons
            .read()
            .iter()
            .any(|m| m.roots.iter().any(|r| r.address == address))
        {
            return PeerRole::Moon;
        }
        PeerRole::Leaf
    }

    /// True when our own identity is a root of the planet or any moon
    pub fn am_root(&self) -> bool {
        self.role(self.identity.address()) != PeerRole::Leaf
    }

    /// Install the trusted-path whitelist, replacing any previous one
    pub fn set_trusted_paths(&self, paths: Vec<TrustedPath>) {
        *self.trusted_paths.write() = paths;
    }

    /// Trust id for an outbound remote address, 0 when untrusted
    pub fn outbound_path_trust(&self, remote: &SocketAddr) -> u64 {
        let ip = remote.ip();
        self.trusted_paths
            .read()
            .iter()
            .find(|t| t.contains(&ip))
            .map(|t| t.trust_id)
            .unwrap_or(0)
    }

    /// Drop peers that have gone fully silent and hold no alive paths
    pub fn do_periodic_tasks(&self, now: u64) {
        let mut peers = self.peers.write();
        peers.retain(|_, p| {
            p.has_alive_path(now)
                || now.saturating_sub(p.last_receive()) < PEER_IN_MEMORY_EXPIRATION
        });
    }

    /// Number of known peers
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}
