//! Virtual Network Membership
//!
//! One `Network` per joined virtual network: the authoritative configuration
//! received from the network's controller, the credential cache for peers on
//! that network, and the join/leave lifecycle. The config is re-requested
//! when older than [`NETWORK_AUTOCONF_DELAY`](crate::NETWORK_AUTOCONF_DELAY).

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ethermesh_crypto::{Address, CertificateOfMembership};

use crate::host::{CallToken, NodeHost, VirtualNetworkConfigOperation};
use crate::netconf::Revocation;
use crate::switch::{Switch, Verb};
use crate::CREDENTIAL_PUSH_INTERVAL;

/// Status of one network membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// Waiting for the controller to answer a config request
    RequestingConfiguration,
    /// Configured and operational
    Ok,
    /// Controller refused us membership
    AccessDenied,
    /// Controller does not know this network
    NotFound,
}

/// A managed IP assignment with its routing prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIp {
    pub ip: IpAddr,
    pub prefix: u8,
}

impl StaticIp {
    /// True when `addr` falls inside this assignment's prefix
    pub fn contains(&self, addr: &IpAddr) -> bool {
        crate::topology::TrustedPath {
            network: self.ip,
            prefix: self.prefix,
            trust_id: 0,
        }
        .contains(addr)
    }
}

/// Authoritative per-network configuration issued by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub nwid: u64,
    pub timestamp: u64,
    pub revision: u64,
    pub name: String,
    pub mtu: u32,
    pub is_private: bool,
    pub multicast_limit: u32,
    pub static_ips: Vec<StaticIp>,
    pub com: Option<CertificateOfMembership>,
}

impl NetworkConfig {
    /// Minimal public-network configuration
    pub fn minimal(nwid: u64, timestamp: u64, name: &str) -> Self {
        Self {
            nwid,
            timestamp,
            revision: 1,
            name: name.to_owned(),
            mtu: 2800,
            is_private: false,
            multicast_limit: 32,
            static_ips: Vec::new(),
            com: None,
        }
    }
}

/// Snapshot descriptor of one network, as exposed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualNetworkConfig {
    pub nwid: u64,
    pub mac: u64,
    pub name: String,
    pub status: NetworkStatus,
    pub is_private: bool,
    pub mtu: u32,
    pub netconf_revision: u64,
    pub assigned_addresses: Vec<StaticIp>,
}

// MAC addresses on a network are a deterministic function of (address, nwid)
// so frame destinations can be routed without ARP-level state.

fn first_octet_for_network(nwid: u64) -> u8 {
    let o = ((nwid & 0xfe) | 0x02) as u8;
    // 0x52 collides with commonly used locally administered ranges
    if o == 0x52 {
        0x32
    } else {
        o
    }
}

/// Synthesize the MAC a member uses on a given network
pub fn mac_for_address(address: Address, nwid: u64) -> u64 {
    let mut m = u64::from(first_octet_for_network(nwid)) << 40;
    m |= address.to_u64();
    m ^= ((nwid >> 8) & 0xff) << 32;
    m ^= ((nwid >> 16) & 0xff) << 24;
    m ^= ((nwid >> 24) & 0xff) << 16;
    m ^= ((nwid >> 32) & 0xff) << 8;
    m ^= (nwid >> 40) & 0xff;
    m
}

/// Recover the member address behind a unicast MAC on a network
pub fn address_from_mac(mac: u64, nwid: u64) -> Address {
    let mut a = mac & 0xff_ffff_ffff;
    a ^= ((nwid >> 8) & 0xff) << 32;
    a ^= ((nwid >> 16) & 0xff) << 24;
    a ^= ((nwid >> 24) & 0xff) << 16;
    a ^= ((nwid >> 32) & 0xff) << 8;
    a ^= (nwid >> 40) & 0xff;
    Address::from_u64(a)
}

/// Group bit of an Ethernet MAC
pub fn is_multicast_mac(mac: u64) -> bool {
    (mac >> 40) & 0x01 != 0
}

/// The all-ones broadcast MAC
pub const BROADCAST_MAC: u64 = 0xffff_ffff_ffff;

struct MemberCredential {
    com: CertificateOfMembership,
    last_pushed_ours: u64,
}

// In-flight reassembly of a chunked config transfer
struct ConfigAssembly {
    update_id: u64,
    data: Vec<u8>,
    received: usize,
}

struct NetworkState {
    config: Option<NetworkConfig>,
    last_config_update: u64,
    status: NetworkStatus,
    destroyed: bool,
    assembly: Option<ConfigAssembly>,
}

/// One joined virtual network
pub struct Network {
    nwid: u64,
    state: Mutex<NetworkState>,
    members: Mutex<HashMap<Address, MemberCredential>>,
    multicast_subscriptions: Mutex<HashSet<(u64, u32)>>,
}

impl Network {
    pub fn new(nwid: u64) -> Self {
        Self {
            nwid,
            state: Mutex::new(NetworkState {
                config: None,
                last_config_update: 0,
                status: NetworkStatus::RequestingConfiguration,
                destroyed: false,
                assembly: None,
            }),
            members: Mutex::new(HashMap::new()),
            multicast_subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn nwid(&self) -> u64 {
        self.nwid
    }

    /// Controller that issued this network (top 40 bits of the id)
    pub fn controller(&self) -> Address {
        Address::from_network_id(self.nwid)
    }

    pub fn has_config(&self) -> bool {
        self.state.lock().config.is_some()
    }

    pub fn last_config_update(&self) -> u64 {
        self.state.lock().last_config_update
    }

    pub fn status(&self) -> NetworkStatus {
        self.state.lock().status
    }

    pub fn config_snapshot(&self) -> Option<NetworkConfig> {
        self.state.lock().config.clone()
    }

    /// Our own membership credential on this network, if issued
    pub fn our_com(&self) -> Option<CertificateOfMembership> {
        self.state.lock().config.as_ref().and_then(|c| c.com.clone())
    }

    /// Install a configuration; returns false if it is for another network
    pub fn set_configuration(
        &self,
        host: &Arc<dyn NodeHost>,
        token: CallToken,
        our_address: Address,
        config: NetworkConfig,
        now: u64,
        save: bool,
    ) -> bool {
        if config.nwid != self.nwid {
            return false;
        }
        let op = {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            let first = state.config.is_none();
            state.config = Some(config.clone());
            state.last_config_update = now;
            state.status = NetworkStatus::Ok;
            if first {
                VirtualNetworkConfigOperation::Up
            } else {
                VirtualNetworkConfigOperation::ConfigUpdate
            }
        };
        info!(nwid = format_args!("{:016x}", self.nwid), ?op, "network configured");
        if save {
            if let Ok(bytes) = bincode::serialize(&config) {
                host.state_object_put(
                    token,
                    crate::host::StateObjectType::NetworkConfig,
                    [self.nwid, 0],
                    &bytes,
                );
            }
        }
        host.virtual_network_config(token, self.nwid, op, &self.external_config(our_address));
        true
    }

    /// Controller says this network does not exist
    pub fn set_not_found(&self, host: &Arc<dyn NodeHost>, token: CallToken, our_address: Address) {
        self.set_failure(host, token, our_address, NetworkStatus::NotFound)
    }

    /// Controller refused our membership
    pub fn set_access_denied(
        &self,
        host: &Arc<dyn NodeHost>,
        token: CallToken,
        our_address: Address,
    ) {
        self.set_failure(host, token, our_address, NetworkStatus::AccessDenied)
    }

    fn set_failure(
        &self,
        host: &Arc<dyn NodeHost>,
        token: CallToken,
        our_address: Address,
        status: NetworkStatus,
    ) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.status = status;
        }
        debug!(nwid = format_args!("{:016x}", self.nwid), ?status, "controller error");
        host.virtual_network_config(
            token,
            self.nwid,
            VirtualNetworkConfigOperation::ConfigUpdate,
            &self.external_config(our_address),
        );
    }

    /// Feed one chunk of a chunked config transfer; `Some` when complete
    pub fn handle_config_chunk(
        &self,
        update_id: u64,
        total_size: u32,
        chunk_index: u32,
        chunk: &[u8],
    ) -> Option<NetworkConfig> {
        // A fresh update id restarts assembly; totals are bounded to keep a
        // hostile controller from ballooning memory
        const MAX_CONFIG_SIZE: u32 = 1 << 20;
        if total_size == 0 || total_size > MAX_CONFIG_SIZE {
            return None;
        }
        let end = chunk_index as usize + chunk.len();
        if end > total_size as usize {
            return None;
        }

        let mut state = self.state.lock();
        if state
            .assembly
            .as_ref()
            .map_or(true, |a| a.update_id != update_id)
        {
            state.assembly = Some(ConfigAssembly {
                update_id,
                data: vec![0u8; total_size as usize],
                received: 0,
            });
        }
        let assembly = state.assembly.as_mut().unwrap();
        if end > assembly.data.len() {
            return None;
        }

        assembly.data[chunk_index as usize..end].copy_from_slice(chunk);
        assembly.received += chunk.len();
        if assembly.received < total_size as usize {
            return None;
        }

        let complete = state.assembly.take().unwrap();
        bincode::deserialize::<NetworkConfig>(&complete.data).ok()
    }

    /// Remember a peer's verified membership credential
    pub fn add_member_com(&self, com: CertificateOfMembership) -> bool {
        if com.network_id() != self.nwid {
            return false;
        }
        let member = com.issued_to();
        let mut members = self.members.lock();
        let entry = members.entry(member).or_insert(MemberCredential {
            com: com.clone(),
            last_pushed_ours: 0,
        });
        // Never replace a newer credential with an older one
        if com.timestamp() >= entry.com.timestamp() {
            entry.com = com;
        }
        true
    }

    /// Known credential for a member
    pub fn member_com(&self, member: Address) -> Option<CertificateOfMembership> {
        self.members.lock().get(&member).map(|m| m.com.clone())
    }

    /// Drop a member credential revoked by the controller
    pub fn apply_revocation(&self, source: Address, rev: &Revocation) -> bool {
        if rev.nwid != self.nwid || source != self.controller() {
            return false;
        }
        self.members.lock().remove(&rev.target).is_some()
    }

    /// May we emit frames onto this network at all?
    pub fn gate_outbound(&self) -> bool {
        let state = self.state.lock();
        match (&state.config, state.status) {
            (Some(config), NetworkStatus::Ok) => !config.is_private || config.com.is_some(),
            _ => false,
        }
    }

    /// May a frame from this member reach our tap device?
    pub fn gate_inbound(&self, from: Address) -> bool {
        let (is_private, our_com) = {
            let state = self.state.lock();
            match &state.config {
                Some(c) => (c.is_private, c.com.clone()),
                None => return false,
            }
        };
        if !is_private {
            return true;
        }
        let ours = match our_com {
            Some(c) => c,
            None => return false,
        };
        match self.member_com(from) {
            Some(theirs) => ours.agrees_with(&theirs),
            None => false,
        }
    }

    /// Push our credential to members that have not seen it recently
    pub fn send_updates_to_members(&self, sw: &Switch, token: CallToken, now: u64) {
        let ours = match self.our_com() {
            Some(c) => c,
            None => return,
        };
        let due: Vec<Address> = {
            let mut members = self.members.lock();
            members
                .iter_mut()
                .filter(|(_, m)| now.saturating_sub(m.last_pushed_ours) >= CREDENTIAL_PUSH_INTERVAL)
                .map(|(a, m)| {
                    m.last_pushed_ours = now;
                    *a
                })
                .collect()
        };
        for member in due {
            let mut body = BytesMut::new();
            body.put_u16(1);
            ours.encode(&mut body);
            body.put_u16(0); // capabilities
            body.put_u16(0); // tags
            body.put_u16(0); // revocations
            sw.send(
                token,
                sw.make_packet(member, Verb::NetworkCredentials, body.freeze()),
                now,
            );
        }
    }

    pub fn multicast_subscribe(&self, group_mac: u64, adi: u32) {
        self.multicast_subscriptions.lock().insert((group_mac, adi));
    }

    pub fn multicast_unsubscribe(&self, group_mac: u64, adi: u32) {
        self.multicast_subscriptions.lock().remove(&(group_mac, adi));
    }

    pub fn multicast_subscriptions(&self) -> Vec<(u64, u32)> {
        let mut subs: Vec<(u64, u32)> = self.multicast_subscriptions.lock().iter().copied().collect();
        subs.sort_unstable();
        subs
    }

    /// Mark destroyed; further config mutations become no-ops
    pub fn mark_destroyed(&self) {
        self.state.lock().destroyed = true;
    }

    /// Snapshot descriptor for host and query consumption
    pub fn external_config(&self, our_address: Address) -> VirtualNetworkConfig {
        let state = self.state.lock();
        match &state.config {
            Some(c) => VirtualNetworkConfig {
                nwid: self.nwid,
                mac: mac_for_address(our_address, self.nwid),
                name: c.name.clone(),
                status: state.status,
                is_private: c.is_private,
                mtu: c.mtu,
                netconf_revision: c.revision,
                assigned_addresses: c.static_ips.clone(),
            },
            None => VirtualNetworkConfig {
                nwid: self.nwid,
                mac: mac_for_address(our_address, self.nwid),
                name: String::new(),
                status: state.status,
                is_private: true,
                mtu: 2800,
                netconf_revision: 0,
                assigned_addresses: Vec::new(),
            },
        }
    }

    /// True when any assigned static IP range contains `addr`
    pub fn static_ips_contain(&self, addr: &IpAddr) -> bool {
        let state = self.state.lock();
        state
            .config
            .as_ref()
            .map(|c| c.static_ips.iter().any(|ip| ip.contains(addr)))
            .unwrap_or(false)
    }
}
