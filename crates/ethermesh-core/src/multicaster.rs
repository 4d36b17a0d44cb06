//! Multicast Group Cache
//!
//! Remembers which remote members have announced interest in each multicast
//! group per network, so multicast frames can be replicated to subscribers.
//! Entries expire after [`MULTICAST_LIKE_EXPIRE`](crate::MULTICAST_LIKE_EXPIRE).

use std::collections::HashMap;

use parking_lot::Mutex;

use ethermesh_crypto::Address;

use crate::MULTICAST_LIKE_EXPIRE;

type GroupKey = (u64, u64, u32); // (nwid, group MAC, ADI)

/// Cache of multicast group members across networks
pub struct Multicaster {
    groups: Mutex<HashMap<GroupKey, HashMap<Address, u64>>>,
}

impl Multicaster {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Record that `member` wants frames for a group
    pub fn add(&self, nwid: u64, group_mac: u64, adi: u32, member: Address, now: u64) {
        self.groups
            .lock()
            .entry((nwid, group_mac, adi))
            .or_default()
            .insert(member, now);
    }

    /// Current non-expired members of a group
    pub fn members(&self, nwid: u64, group_mac: u64, adi: u32, now: u64) -> Vec<Address> {
        self.groups
            .lock()
            .get(&(nwid, group_mac, adi))
            .map(|m| {
                let mut out: Vec<Address> = m
                    .iter()
                    .filter(|(_, ts)| now.saturating_sub(**ts) < MULTICAST_LIKE_EXPIRE)
                    .map(|(a, _)| *a)
                    .collect();
                out.sort_unstable();
                out
            })
            .unwrap_or_default()
    }

    /// Drop expired members and empty groups
    pub fn clean(&self, now: u64) {
        let mut groups = self.groups.lock();
        for members in groups.values_mut() {
            members.retain(|_, ts| now.saturating_sub(*ts) < MULTICAST_LIKE_EXPIRE);
        }
        groups.retain(|_, members| !members.is_empty());
    }
}

impl Default for Multicaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_expire() {
        let mc = Multicaster::new();
        let a = Address::from_u64(1);
        let b = Address::from_u64(2);
        mc.add(7, 0xffffffffffff, 0, a, 1000);
        mc.add(7, 0xffffffffffff, 0, b, 2000);

        assert_eq!(mc.members(7, 0xffffffffffff, 0, 2000), vec![a, b]);
        let later = 1000 + MULTICAST_LIKE_EXPIRE;
        assert_eq!(mc.members(7, 0xffffffffffff, 0, later), vec![b]);

        mc.clean(2000 + MULTICAST_LIKE_EXPIRE);
        assert!(mc.members(7, 0xffffffffffff, 0, 2000).is_empty());
    }
}
