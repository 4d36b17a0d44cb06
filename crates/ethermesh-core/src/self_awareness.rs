//! External Surface Awareness
//!
//! Tracks how remote peers see us: each trusted reporter's claim of our
//! external `ip:port` per local socket. Used to detect NAT remappings and to
//! advertise plausible direct-path endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tracing::debug;

use ethermesh_crypto::Address;

const ENTRY_TIMEOUT: u64 = 600_000;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SurfaceKey {
    reporter: Address,
    local_socket: i64,
}

/// Cache of externally observed addresses
pub struct SelfAwareness {
    surface: Mutex<HashMap<SurfaceKey, (SocketAddr, u64)>>,
}

impl SelfAwareness {
    pub fn new() -> Self {
        Self {
            surface: Mutex::new(HashMap::new()),
        }
    }

    /// Record a reporter's claim of our external address
    pub fn iam(&self, reporter: Address, local_socket: i64, reported: SocketAddr, now: u64) {
        let mut surface = self.surface.lock();
        let key = SurfaceKey {
            reporter,
            local_socket,
        };
        if let Some((prev, _)) = surface.get(&key) {
            if *prev != reported {
                debug!(%reporter, %reported, "external surface changed");
            }
        }
        surface.insert(key, (reported, now));
    }

    /// Distinct external addresses reported recently
    pub fn external_addresses(&self, now: u64) -> Vec<SocketAddr> {
        let surface = self.surface.lock();
        let mut out: Vec<SocketAddr> = surface
            .values()
            .filter(|(_, ts)| now.saturating_sub(*ts) < ENTRY_TIMEOUT)
            .map(|(a, _)| *a)
            .collect();
        out.sort_unstable_by_key(|a| (a.is_ipv6(), a.ip(), a.port()));
        out.dedup();
        out
    }

    /// Drop stale observations
    pub fn clean(&self, now: u64) {
        self.surface
            .lock()
            .retain(|_, (_, ts)| now.saturating_sub(*ts) < ENTRY_TIMEOUT);
    }
}

impl Default for SelfAwareness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observations_dedupe_and_expire() {
        let sa = SelfAwareness::new();
        let ext: SocketAddr = "203.0.113.7:9993".parse().unwrap();
        sa.iam(Address::from_u64(1), -1, ext, 1000);
        sa.iam(Address::from_u64(2), -1, ext, 1000);

        assert_eq!(sa.external_addresses(1000), vec![ext]);
        sa.clean(1000 + ENTRY_TIMEOUT);
        assert!(sa.external_addresses(1000 + ENTRY_TIMEOUT).is_empty());
    }
}
