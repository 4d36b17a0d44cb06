//! Peers
//!
//! A peer is another node we have exchanged packets with. Each peer keeps at
//! most one IPv4 and one IPv6 path slot; upstream peers are pinged on both
//! families so relays can perform hole-punch introductions for either stack.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ethermesh_crypto::{Address, Identity};

use crate::host::CallToken;
use crate::path::{IpFamily, Path};
use crate::switch::Switch;
use crate::{PEER_ACTIVITY_TIMEOUT, PEER_PATH_EXPIRATION, PEER_PING_PERIOD};

/// Remote software version learned from HELLO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerVersion {
    pub proto: u8,
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
}

#[derive(Default)]
struct PathSlot {
    path: Option<Arc<Path>>,
    last_receive: u64,
}

impl PathSlot {
    fn alive(&self, now: u64) -> bool {
        self.path.is_some() && now.saturating_sub(self.last_receive) < PEER_PATH_EXPIRATION
    }
}

#[derive(Default)]
struct PathSlots {
    v4: PathSlot,
    v6: PathSlot,
}

impl PathSlots {
    fn slot_mut(&mut self, family: IpFamily) -> &mut PathSlot {
        match family {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
        }
    }

    fn slot(&self, family: IpFamily) -> &PathSlot {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }
}

/// A remote node and its candidate physical paths
pub struct Peer {
    identity: Identity,
    last_receive: AtomicU64,
    latency: AtomicU64,
    version: Mutex<Option<PeerVersion>>,
    paths: Mutex<PathSlots>,
}

impl Peer {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            last_receive: AtomicU64::new(0),
            latency: AtomicU64::new(u64::from(u16::MAX)),
            version: Mutex::new(None),
            paths: Mutex::new(PathSlots::default()),
        }
    }

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Record an inbound packet from `remote`, learning the path if new
    pub fn received(&self, local_socket: i64, remote: SocketAddr, now: u64) {
        self.last_receive.store(now, Ordering::Relaxed);
        let mut paths = self.paths.lock();
        let slot = paths.slot_mut(IpFamily::of(&remote));
        match &slot.path {
            Some(p) if p.address() == remote && p.local_socket() == local_socket => {
                p.received(now);
            }
            _ => {
                let p = Arc::new(Path::new(local_socket, remote));
                p.received(now);
                slot.path = Some(p);
            }
        }
        slot.last_receive = now;
    }

    /// Most recent receive over any path (ms)
    pub fn last_receive(&self) -> u64 {
        self.last_receive.load(Ordering::Relaxed)
    }

    /// True while this peer has sent us anything recently
    pub fn is_active(&self, now: u64) -> bool {
        now.saturating_sub(self.last_receive()) < PEER_ACTIVITY_TIMEOUT
    }

    /// Round-trip latency in ms, `u16::MAX` when unknown
    pub fn latency(&self) -> u16 {
        self.latency.load(Ordering::Relaxed) as u16
    }

    pub fn record_latency(&self, ms: u16) {
        self.latency.store(u64::from(ms), Ordering::Relaxed);
    }

    pub fn version(&self) -> Option<PeerVersion> {
        *self.version.lock()
    }

    pub fn set_version(&self, v: PeerVersion) {
        *self.version.lock() = Some(v);
    }

    /// Alive paths, most recently active first
    pub fn paths(&self, now: u64) -> Vec<Arc<Path>> {
        let paths = self.paths.lock();
        let mut out: Vec<Arc<Path>> = [&paths.v4, &paths.v6]
            .into_iter()
            .filter(|s| s.alive(now))
            .filter_map(|s| s.path.clone())
            .collect();
        out.sort_by_key(|p| std::cmp::Reverse(p.last_in()));
        out
    }

    /// Best current path: the slot with the most recent inbound traffic
    pub fn best_path(&self, now: u64, include_expired: bool) -> Option<Arc<Path>> {
        let paths = self.paths.lock();
        let candidate = |slot: &PathSlot| -> Option<(u64, Arc<Path>)> {
            if include_expired || slot.alive(now) {
                slot.path.clone().map(|p| (p.last_in(), p))
            } else {
                None
            }
        };
        let v4 = candidate(&paths.v4);
        let v6 = candidate(&paths.v6);
        match (v4, v6) {
            (Some((a, pa)), Some((b, pb))) => Some(if b > a { pb } else { pa }),
            (Some((_, p)), None) | (None, Some((_, p))) => Some(p),
            (None, None) => None,
        }
    }

    /// True if this peer has any alive path
    pub fn has_alive_path(&self, now: u64) -> bool {
        let paths = self.paths.lock();
        paths.v4.alive(now) || paths.v6.alive(now)
    }

    /// Send a HELLO to a specific endpoint (not necessarily a known path)
    pub fn send_hello(
        &self,
        sw: &Switch,
        token: CallToken,
        local_socket: i64,
        at_address: SocketAddr,
        now: u64,
    ) {
        sw.send_hello(token, self.address(), local_socket, at_address, now);
    }

    fn attempt_to_contact_at(
        &self,
        sw: &Switch,
        token: CallToken,
        local_socket: i64,
        at_address: SocketAddr,
        now: u64,
        send_full_hello: bool,
    ) {
        if !send_full_hello && self.version().is_some() {
            sw.send_echo(token, self.address(), local_socket, at_address);
        } else {
            self.send_hello(sw, token, local_socket, at_address, now);
        }
    }

    /// Ping this peer if its path for `family` is alive and due
    ///
    /// Returns true only when a ping was actually sent; callers treat false
    /// as "this family needs direct contact" and fall back to a stable
    /// endpoint HELLO. A family of `None` pings whichever slot saw inbound
    /// traffic most recently.
    pub fn do_ping_and_keepalive(
        &self,
        sw: &Switch,
        token: CallToken,
        now: u64,
        family: Option<IpFamily>,
    ) -> bool {
        let (path, local_socket, address) = {
            let paths = self.paths.lock();
            let slot = match family {
                Some(f) => {
                    let slot = paths.slot(f);
                    if !slot.alive(now) {
                        return false;
                    }
                    slot
                }
                None => {
                    let v4_lr = if paths.v4.alive(now) {
                        paths.v4.path.as_ref().map_or(0, |p| p.last_in())
                    } else {
                        0
                    };
                    let v6_lr = if paths.v6.alive(now) {
                        paths.v6.path.as_ref().map_or(0, |p| p.last_in())
                    } else {
                        0
                    };
                    if v6_lr > v4_lr {
                        &paths.v6
                    } else if v4_lr > 0 {
                        &paths.v4
                    } else {
                        return false;
                    }
                }
            };
            let path = match &slot.path {
                Some(p) => p.clone(),
                None => return false,
            };
            let due = now.saturating_sub(slot.last_receive) >= PEER_PING_PERIOD
                || path.needs_heartbeat(now);
            if !due {
                return false;
            }
            (path.clone(), path.local_socket(), path.address())
        };

        self.attempt_to_contact_at(sw, token, local_socket, address, now, false);
        path.sent(now);
        true
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Peer({})", self.address())
    }
}
