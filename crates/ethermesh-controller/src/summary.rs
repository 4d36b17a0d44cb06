//! Derived Network Summaries
//!
//! The summary is derived, never authoritative: it must always be
//! recomputable from the member records alone. A member counts as active
//! when its most recent log entry is newer than two config-refresh periods.

use std::net::IpAddr;

use ethermesh_crypto::Address;

/// Config refresh period mirrored from the node runtime (ms)
const NETWORK_AUTOCONF_DELAY: u64 = 60_000;

/// Derived statistics for one network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSummaryInfo {
    /// Authorized members flagged as active bridges, sorted
    pub active_bridges: Vec<Address>,
    /// IPs assigned to authorized members, sorted by address
    pub allocated_ips: Vec<IpAddr>,
    pub authorized_member_count: u64,
    pub active_member_count: u64,
    pub total_member_count: u64,
    /// Most recent deauthorization among unauthorized members (ms)
    pub most_recent_deauth_time: u64,
}

fn json_bool(v: &serde_json::Value, key: &str) -> bool {
    v.get(key).and_then(|b| b.as_bool()).unwrap_or(false)
}

fn json_u64(v: &serde_json::Value, key: &str) -> u64 {
    v.get(key).and_then(|n| n.as_u64()).unwrap_or(0)
}

/// Recompute a summary over the full member set of one network
pub fn compute_summary<'a>(
    members: impl Iterator<Item = (u64, &'a serde_json::Value)>,
    now: u64,
) -> NetworkSummaryInfo {
    let mut ns = NetworkSummaryInfo::default();

    for (member_id, member) in members {
        if json_bool(member, "authorized") {
            ns.authorized_member_count += 1;

            if let Some(log0) = member
                .get("recentLog")
                .and_then(|l| l.as_array())
                .and_then(|l| l.first())
            {
                if log0.is_object()
                    && now.saturating_sub(json_u64(log0, "ts")) < NETWORK_AUTOCONF_DELAY * 2
                {
                    ns.active_member_count += 1;
                }
            }

            if json_bool(member, "activeBridge") {
                ns.active_bridges.push(Address::from_u64(member_id));
            }

            if let Some(ips) = member.get("ipAssignments").and_then(|i| i.as_array()) {
                for ip in ips {
                    if let Some(s) = ip.as_str() {
                        // Assignments may carry a /prefix suffix
                        let bare = s.split('/').next().unwrap_or(s);
                        if let Ok(parsed) = bare.parse::<IpAddr>() {
                            ns.allocated_ips.push(parsed);
                        }
                    }
                }
            }
        } else {
            ns.most_recent_deauth_time = ns
                .most_recent_deauth_time
                .max(json_u64(member, "lastDeauthorizedTime"));
        }
        ns.total_member_count += 1;
    }

    ns.active_bridges.sort_unstable();
    ns.allocated_ips.sort_unstable();
    ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_counts_and_deauth() {
        let now = 1_000_000u64;
        let members = vec![
            (
                0x01u64,
                json!({
                    "authorized": true,
                    "activeBridge": true,
                    "ipAssignments": ["10.1.0.1"],
                    "recentLog": [{"ts": now - 1000}],
                }),
            ),
            (
                0x02u64,
                json!({
                    "authorized": true,
                    "ipAssignments": ["10.1.0.2"],
                    "recentLog": [{"ts": now - NETWORK_AUTOCONF_DELAY * 3}],
                }),
            ),
            (
                0x03u64,
                json!({
                    "authorized": false,
                    "lastDeauthorizedTime": 5000,
                }),
            ),
        ];

        let ns = compute_summary(members.iter().map(|(id, v)| (*id, v)), now);
        assert_eq!(ns.total_member_count, 3);
        assert_eq!(ns.authorized_member_count, 2);
        assert_eq!(ns.active_member_count, 1);
        assert_eq!(ns.most_recent_deauth_time, 5000);
        assert_eq!(ns.active_bridges, vec![Address::from_u64(0x01)]);
        assert_eq!(
            ns.allocated_ips,
            vec!["10.1.0.1".parse::<IpAddr>().unwrap(), "10.1.0.2".parse().unwrap()]
        );
    }

    #[test]
    fn test_summary_sorts_outputs() {
        let now = 10_000u64;
        let members = vec![
            (
                0x09u64,
                json!({"authorized": true, "activeBridge": true, "ipAssignments": ["10.0.0.9"]}),
            ),
            (
                0x01u64,
                json!({"authorized": true, "activeBridge": true, "ipAssignments": ["10.0.0.1"]}),
            ),
        ];
        let ns = compute_summary(members.iter().map(|(id, v)| (*id, v)), now);
        assert_eq!(
            ns.active_bridges,
            vec![Address::from_u64(0x01), Address::from_u64(0x09)]
        );
        assert_eq!(
            ns.allocated_ips,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.9".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_malformed_members_are_tolerated() {
        let now = 10_000u64;
        let members = vec![
            (0x01u64, json!({"authorized": true, "recentLog": "not an array"})),
            (0x02u64, json!("not an object")),
        ];
        let ns = compute_summary(members.iter().map(|(id, v)| (*id, v)), now);
        assert_eq!(ns.total_member_count, 2);
        assert_eq!(ns.authorized_member_count, 1);
        assert_eq!(ns.active_member_count, 0);
    }
}
