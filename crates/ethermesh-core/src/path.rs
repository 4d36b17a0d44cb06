//! Physical Paths
//!
//! A path is one `(local socket, remote address)` pair over which a peer has
//! been reached. Paths carry last-in/last-out bookkeeping used by the
//! keepalive logic and expire when nothing has been received for
//! [`PEER_PATH_EXPIRATION`](crate::PEER_PATH_EXPIRATION).

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{PEER_PATH_EXPIRATION, PEER_PING_PERIOD};

/// Address family of a physical path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv4() {
            IpFamily::V4
        } else {
            IpFamily::V6
        }
    }
}

/// One candidate physical path to a peer
#[derive(Debug)]
pub struct Path {
    local_socket: i64,
    address: SocketAddr,
    last_in: AtomicU64,
    last_out: AtomicU64,
    link_quality: AtomicU64,
}

impl Path {
    pub fn new(local_socket: i64, address: SocketAddr) -> Self {
        Self {
            local_socket,
            address,
            last_in: AtomicU64::new(0),
            last_out: AtomicU64::new(0),
            link_quality: AtomicU64::new(255),
        }
    }

    pub fn local_socket(&self) -> i64 {
        self.local_socket
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.address)
    }

    /// Record an inbound packet
    pub fn received(&self, now: u64) {
        self.last_in.store(now, Ordering::Relaxed);
    }

    /// Record an outbound packet
    pub fn sent(&self, now: u64) {
        self.last_out.store(now, Ordering::Relaxed);
    }

    pub fn last_in(&self) -> u64 {
        self.last_in.load(Ordering::Relaxed)
    }

    pub fn last_out(&self) -> u64 {
        self.last_out.load(Ordering::Relaxed)
    }

    /// Link quality estimate in [0, 255], 255 = perfect
    pub fn link_quality(&self) -> u8 {
        self.link_quality.load(Ordering::Relaxed) as u8
    }

    pub fn set_link_quality(&self, q: u8) {
        self.link_quality.store(u64::from(q), Ordering::Relaxed);
    }

    /// True while inbound traffic has been seen recently enough
    pub fn alive(&self, now: u64) -> bool {
        now.saturating_sub(self.last_in()) < PEER_PATH_EXPIRATION
    }

    /// True when the keepalive period has elapsed since the last send
    pub fn needs_heartbeat(&self, now: u64) -> bool {
        now.saturating_sub(self.last_out()) >= PEER_PING_PERIOD
    }

    /// Addresses that can never carry overlay traffic
    pub fn is_address_valid(addr: &SocketAddr) -> bool {
        if addr.port() == 0 {
            return false;
        }
        match addr.ip() {
            IpAddr::V4(ip) => {
                !ip.is_unspecified() && !ip.is_multicast() && !ip.is_broadcast()
            }
            IpAddr::V6(ip) => !ip.is_unspecified() && !ip.is_multicast(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_alive_tracks_last_in() {
        let p = Path::new(-1, addr("192.0.2.1:9993"));
        assert!(!p.alive(PEER_PATH_EXPIRATION + 1));
        p.received(1000);
        assert!(p.alive(1000 + PEER_PATH_EXPIRATION - 1));
        assert!(!p.alive(1000 + PEER_PATH_EXPIRATION));
    }

    #[test]
    fn test_heartbeat_due_after_ping_period() {
        let p = Path::new(-1, addr("192.0.2.1:9993"));
        p.sent(1000);
        assert!(!p.needs_heartbeat(1000 + PEER_PING_PERIOD - 1));
        assert!(p.needs_heartbeat(1000 + PEER_PING_PERIOD));
    }

    #[test]
    fn test_address_validity() {
        assert!(Path::is_address_valid(&addr("192.0.2.1:9993")));
        assert!(!Path::is_address_valid(&addr("192.0.2.1:0")));
        assert!(!Path::is_address_valid(&addr("0.0.0.0:9993")));
        assert!(!Path::is_address_valid(&addr("224.0.0.1:9993")));
        assert!(!Path::is_address_valid(&addr("[::]:9993")));
        assert!(Path::is_address_valid(&addr("[2001:db8::1]:9993")));
    }
}
