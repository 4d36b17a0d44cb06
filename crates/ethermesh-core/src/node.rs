//! Node Runtime
//!
//! The orchestrator that ties the runtime together: it loads or generates
//! the node identity, ingests wire packets and tap frames, drives the
//! periodic maintenance loop, manages network membership lifecycle, answers
//! snapshot queries, and delivers configs for an embedded controller.
//!
//! All public methods are re-entrant and callable from any host thread; each
//! acquires only the locks it needs. `process_background_tasks` serializes
//! itself so concurrent ticks degenerate to one active tick.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use ethermesh_crypto::{
    Address, CertificateOfMembership, CredentialVerdict, Identity, SignerLookup,
};

use crate::error::{CoreResult, ResultCode};
use crate::host::{
    CallToken, Event, NodeHost, StateObjectType, VirtualNetworkConfigOperation,
};
use crate::multicaster::Multicaster;
use crate::netconf::{ControllerSender, NcErrorCode, NetworkController, Revocation};
use crate::network::{Network, NetworkConfig, VirtualNetworkConfig};
use crate::path::{IpFamily, Path};
use crate::query::{NodeStatus, PathInfo, PeerInfo, PeerList, VirtualNetworkList};
use crate::self_awareness::SelfAwareness;
use crate::switch::{ExpectingReplies, Switch, Verb, ERROR_NETWORK_ACCESS_DENIED, ERROR_OBJ_NOT_FOUND};
use crate::topology::{Topology, TrustedPath};
use crate::trace::Trace;
use crate::{
    HOUSEKEEPING_PERIOD, NETWORK_AUTOCONF_DELAY, PEER_ACTIVITY_TIMEOUT, PING_CHECK_INTERVAL,
    TIMER_GRANULARITY, UDP_DEFAULT_PAYLOAD_MTU,
};

struct BackgroundTasksState {
    last_ping_check: u64,
    last_housekeeping_run: u64,
}

/// One running node: a single identity participating in zero or more
/// virtual networks
pub struct Node {
    // Subcomponents are torn down in the reverse of their construction
    // order: declaration order here is that reverse.
    self_awareness: Arc<SelfAwareness>,
    topology: Arc<Topology>,
    multicaster: Arc<Multicaster>,
    sw: Arc<Switch>,
    trace: Arc<Trace>,

    host: Arc<dyn NodeHost>,
    identity: Identity,
    public_identity_str: String,
    secret_identity_str: String,

    netconf_master: RwLock<Option<Arc<dyn NetworkController>>>,
    networks: RwLock<HashMap<u64, Arc<Network>>>,
    direct_paths: Mutex<Vec<SocketAddr>>,
    background_tasks: Mutex<BackgroundTasksState>,
    online: AtomicBool,
    now: AtomicU64,
    prng_state: Mutex<[u64; 2]>,
    replies: Arc<ExpectingReplies>,
}

impl Node {
    /// Construct a node, loading or generating its identity through the
    /// host's state callbacks, and post [`Event::Up`]
    pub fn new(host: Arc<dyn NodeHost>, token: CallToken, now: u64) -> CoreResult<Arc<Self>> {
        let identity = Self::load_or_generate_identity(&host, token)?;
        let public_identity_str = identity.to_text(false)?;
        let secret_identity_str = identity.to_text(true)?;
        info!(address = %identity.address(), "node identity ready");

        let mut prng_state = [0u64; 2];
        let mut rng = rand::rngs::OsRng;
        prng_state[0] = rng.next_u64() | 1;
        prng_state[1] = rng.next_u64() | 1;

        // Dependency order: trace, switch, multicaster, topology,
        // self-awareness
        let replies = Arc::new(ExpectingReplies::new());
        let trace = Arc::new(Trace::new(host.clone()));
        let sw = Arc::new(Switch::new(
            host.clone(),
            identity.clone(),
            trace.clone(),
            replies.clone(),
        ));
        let multicaster = Arc::new(Multicaster::new());
        let topology = Arc::new(Topology::new(identity.clone()));
        let self_awareness = Arc::new(SelfAwareness::new());

        let node = Arc::new(Self {
            self_awareness,
            topology,
            multicaster,
            sw,
            trace,
            host,
            identity,
            public_identity_str,
            secret_identity_str,
            netconf_master: RwLock::new(None),
            networks: RwLock::new(HashMap::new()),
            direct_paths: Mutex::new(Vec::new()),
            background_tasks: Mutex::new(BackgroundTasksState {
                last_ping_check: 0,
                last_housekeeping_run: 0,
            }),
            online: AtomicBool::new(false),
            now: AtomicU64::new(now),
            prng_state: Mutex::new(prng_state),
            replies,
        });
        node.sw.attach(&node);

        node.host.post_event(token, Event::Up);
        Ok(node)
    }

    fn load_or_generate_identity(
        host: &Arc<dyn NodeHost>,
        token: CallToken,
    ) -> CoreResult<Identity> {
        let loaded = host
            .state_object_get(token, StateObjectType::IdentitySecret, [0, 0])
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|text| Identity::from_text(&text).ok())
            .filter(|id| id.has_secret());

        match loaded {
            Some(identity) => {
                // Re-assert the public object if it is missing or stale
                let id_key = [identity.address().to_u64(), 0];
                let public = identity.to_text(false)?;
                let existing =
                    host.state_object_get(token, StateObjectType::IdentityPublic, id_key);
                if existing.as_deref() != Some(public.as_bytes()) {
                    host.state_object_put(
                        token,
                        StateObjectType::IdentityPublic,
                        id_key,
                        public.as_bytes(),
                    );
                }
                Ok(identity)
            }
            None => {
                let identity = Identity::generate();
                let id_key = [identity.address().to_u64(), 0];
                host.state_object_put(
                    token,
                    StateObjectType::IdentitySecret,
                    id_key,
                    identity.to_text(true)?.as_bytes(),
                );
                host.state_object_put(
                    token,
                    StateObjectType::IdentityPublic,
                    id_key,
                    identity.to_text(false)?.as_bytes(),
                );
                Ok(identity)
            }
        }
    }

    // ==================
    // Packet and frame ingestion
    // ==================

    /// Feed one inbound UDP datagram; malformed input is swallowed
    pub fn process_wire_packet(
        &self,
        token: CallToken,
        now: u64,
        local_socket: i64,
        remote: SocketAddr,
        data: &[u8],
        _next_deadline: &mut u64,
    ) -> ResultCode {
        self.now.store(now, Ordering::Relaxed);
        self.sw.on_remote_packet(token, local_socket, remote, data, now);
        ResultCode::Ok
    }

    /// Feed one Ethernet frame from the tap device of a joined network
    #[allow(clippy::too_many_arguments)]
    pub fn process_virtual_network_frame(
        &self,
        token: CallToken,
        now: u64,
        nwid: u64,
        source_mac: u64,
        dest_mac: u64,
        ether_type: u16,
        vlan_id: u16,
        frame: &[u8],
        _next_deadline: &mut u64,
    ) -> ResultCode {
        self.now.store(now, Ordering::Relaxed);
        match self.network(nwid) {
            Some(network) => {
                self.sw.on_local_ethernet(
                    token, &network, source_mac, dest_mac, ether_type, vlan_id, frame, now,
                );
                ResultCode::Ok
            }
            None => ResultCode::NetworkNotFound,
        }
    }

    // ==================
    // Periodic maintenance
    // ==================

    /// The periodic driver; the host must call this again no later than the
    /// deadline written to `next_deadline`
    pub fn process_background_tasks(
        &self,
        token: CallToken,
        now: u64,
        next_deadline: &mut u64,
    ) -> ResultCode {
        self.now.store(now, Ordering::Relaxed);
        let mut bg = self.background_tasks.lock();

        let mut time_until_next_ping_check = PING_CHECK_INTERVAL;
        let time_since_last_ping_check = now.saturating_sub(bg.last_ping_check);
        if time_since_last_ping_check >= PING_CHECK_INTERVAL {
            bg.last_ping_check = now;

            // Collect networks needing config under the lock, then request
            // outside it; credential pushes are in-memory and stay inside
            let mut need_config = Vec::new();
            {
                let networks = self.networks.read();
                for network in networks.values() {
                    if now.saturating_sub(network.last_config_update()) >= NETWORK_AUTOCONF_DELAY
                        || !network.has_config()
                    {
                        need_config.push(network.clone());
                    }
                    network.send_updates_to_members(&self.sw, token, now);
                }
            }
            for network in need_config {
                self.request_network_config(token, &network, now);
            }

            // Ping upstreams on both families, keep active peers alive
            let mut upstreams_to_contact = self.topology.upstreams_to_contact();
            let best_upstream = self.topology.best_upstream();
            let mut last_receive_from_upstream = 0u64;

            for (address, peer) in self.topology.all_peers() {
                if let Some(stable_endpoints) = upstreams_to_contact.remove(&address) {
                    let mut contacted = false;
                    for family in [IpFamily::V4, IpFamily::V6] {
                        if peer.do_ping_and_keepalive(&self.sw, token, now, Some(family)) {
                            contacted = true;
                            continue;
                        }
                        let mut ptr = self.prng() as usize;
                        for _ in 0..stable_endpoints.len() {
                            let endpoint = stable_endpoints[ptr % stable_endpoints.len()];
                            ptr = ptr.wrapping_add(1);
                            if IpFamily::of(&endpoint) == family {
                                peer.send_hello(&self.sw, token, -1, endpoint, now);
                                contacted = true;
                                break;
                            }
                        }
                    }

                    if !contacted {
                        if let Some(up) = &best_upstream {
                            if let Some(path) = up.best_path(now, true) {
                                peer.send_hello(
                                    &self.sw,
                                    token,
                                    path.local_socket(),
                                    path.address(),
                                    now,
                                );
                            }
                        }
                    }

                    last_receive_from_upstream =
                        last_receive_from_upstream.max(peer.last_receive());
                } else if peer.is_active(now) {
                    peer.do_ping_and_keepalive(&self.sw, token, now, None);
                }
            }

            // Upstream addresses with no peer record yet: resolve via WHOIS
            for address in upstreams_to_contact.into_keys() {
                self.sw.request_whois(token, address, now);
            }

            // Online state follows upstream reachability; post transitions
            // exactly once
            let online = now.saturating_sub(last_receive_from_upstream) < PEER_ACTIVITY_TIMEOUT
                || self.topology.am_root();
            let was_online = self.online.swap(online, Ordering::Relaxed);
            if was_online != online {
                self.host.post_event(
                    token,
                    if online { Event::Online } else { Event::Offline },
                );
            }
        } else {
            time_until_next_ping_check -= time_since_last_ping_check;
        }

        if now.saturating_sub(bg.last_housekeeping_run) >= HOUSEKEEPING_PERIOD {
            bg.last_housekeeping_run = now;
            self.topology.do_periodic_tasks(now);
            self.self_awareness.clean(now);
            self.multicaster.clean(now);
        }

        *next_deadline = now
            + time_until_next_ping_check
                .min(self.sw.do_timer_tasks(token, now))
                .max(TIMER_GRANULARITY);
        ResultCode::Ok
    }

    // ==================
    // Network membership lifecycle
    // ==================

    /// Join a network; idempotent (an existing membership is kept)
    pub fn join(&self, _token: CallToken, nwid: u64) -> ResultCode {
        let mut networks = self.networks.write();
        networks.entry(nwid).or_insert_with(|| {
            info!(nwid = format_args!("{:016x}", nwid), "joining network");
            Arc::new(Network::new(nwid))
        });
        ResultCode::Ok
    }

    /// Leave a network; idempotent, the tap port receives `Destroy`
    pub fn leave(&self, token: CallToken, nwid: u64) -> ResultCode {
        let network = self.networks.write().remove(&nwid);
        if let Some(network) = network {
            let config = network.external_config(self.identity.address());
            network.mark_destroyed();
            self.host.virtual_network_config(
                token,
                nwid,
                VirtualNetworkConfigOperation::Destroy,
                &config,
            );
            self.host
                .state_object_delete(token, StateObjectType::NetworkConfig, [nwid, 0]);
            self.trace.network_destroyed(token, nwid);
        }
        ResultCode::Ok
    }

    pub fn multicast_subscribe(
        &self,
        _token: CallToken,
        nwid: u64,
        group_mac: u64,
        adi: u32,
    ) -> ResultCode {
        match self.network(nwid) {
            Some(network) => {
                network.multicast_subscribe(group_mac, adi);
                ResultCode::Ok
            }
            None => ResultCode::NetworkNotFound,
        }
    }

    pub fn multicast_unsubscribe(
        &self,
        _token: CallToken,
        nwid: u64,
        group_mac: u64,
        adi: u32,
    ) -> ResultCode {
        match self.network(nwid) {
            Some(network) => {
                network.multicast_unsubscribe(group_mac, adi);
                ResultCode::Ok
            }
            None => ResultCode::NetworkNotFound,
        }
    }

    /// Federate with a moon; a bare seed is resolved via WHOIS
    pub fn orbit(&self, _token: CallToken, moon_id: u64, seed: u64) -> ResultCode {
        self.topology.add_moon(moon_id, Address::from_u64(seed));
        ResultCode::Ok
    }

    pub fn deorbit(&self, _token: CallToken, moon_id: u64) -> ResultCode {
        self.topology.remove_moon(moon_id);
        ResultCode::Ok
    }

    // ==================
    // Queries
    // ==================

    pub fn address(&self) -> Address {
        self.identity.address()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            address: self.identity.address(),
            public_identity: self.public_identity_str.clone(),
            secret_identity: self.secret_identity_str.clone(),
            online: self.online.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of all known peers, sorted by address
    pub fn peers(&self) -> PeerList {
        let now = self.now();
        let peers = self
            .topology
            .all_peers()
            .into_iter()
            .map(|(address, peer)| {
                let best = peer.best_path(now, false);
                let paths = peer
                    .paths(now)
                    .into_iter()
                    .map(|path| PathInfo {
                        remote: path.address(),
                        last_send: path.last_out(),
                        last_receive: path.last_in(),
                        trusted_path_id: self.topology.outbound_path_trust(&path.address()),
                        link_quality: path.link_quality(),
                        expired: !path.alive(now),
                        preferred: best
                            .as_ref()
                            .map(|b| Arc::ptr_eq(b, &path))
                            .unwrap_or(false),
                    })
                    .collect();
                let (version_major, version_minor, version_rev) = match peer.version() {
                    Some(v) => (i32::from(v.major), i32::from(v.minor), i32::from(v.revision)),
                    None => (-1, -1, -1),
                };
                PeerInfo {
                    address,
                    version_major,
                    version_minor,
                    version_rev,
                    latency: peer.latency(),
                    role: self.topology.role(address),
                    paths,
                }
            })
            .collect();
        PeerList { peers }
    }

    /// Snapshot of all joined networks
    pub fn networks(&self) -> VirtualNetworkList {
        let networks = self.networks.read();
        let mut out: Vec<VirtualNetworkConfig> = networks
            .values()
            .map(|n| n.external_config(self.identity.address()))
            .collect();
        out.sort_by_key(|c| c.nwid);
        VirtualNetworkList { networks: out }
    }

    /// Snapshot of one network, `None` if not joined
    pub fn network_config(&self, nwid: u64) -> Option<VirtualNetworkConfig> {
        self.network(nwid)
            .map(|n| n.external_config(self.identity.address()))
    }

    pub(crate) fn network(&self, nwid: u64) -> Option<Arc<Network>> {
        self.networks.read().get(&nwid).cloned()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub(crate) fn multicaster(&self) -> &Arc<Multicaster> {
        &self.multicaster
    }

    pub(crate) fn self_awareness(&self) -> &Arc<SelfAwareness> {
        &self.self_awareness
    }

    /// Distinct external addresses peers have recently reported for us
    pub fn external_addresses(&self) -> Vec<SocketAddr> {
        self.self_awareness.external_addresses(self.now())
    }

    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    // ==================
    // Misc public surface
    // ==================

    /// Best-effort application datagram; false when unsendable (including
    /// to ourselves)
    pub fn send_user_message(
        &self,
        token: CallToken,
        dest: Address,
        type_id: u64,
        data: &[u8],
    ) -> bool {
        if dest == self.identity.address() {
            return false;
        }
        let mut body = BytesMut::with_capacity(8 + data.len());
        body.put_u64(type_id);
        body.put_slice(data);
        let packet = self.sw.make_packet(dest, Verb::UserMessage, body.freeze());
        self.sw.send(token, packet, self.now());
        true
    }

    /// Advertise a local interface address for direct paths; set semantics,
    /// false when already present or invalid
    pub fn add_local_interface_address(&self, address: SocketAddr) -> bool {
        if !Path::is_address_valid(&address) {
            return false;
        }
        let mut direct_paths = self.direct_paths.lock();
        if direct_paths.contains(&address) {
            return false;
        }
        direct_paths.push(address);
        true
    }

    pub fn clear_local_interface_addresses(&self) {
        self.direct_paths.lock().clear();
    }

    pub fn local_interface_addresses(&self) -> Vec<SocketAddr> {
        self.direct_paths.lock().clone()
    }

    /// Install the CIDR→trust-id whitelist for encryption bypass
    pub fn set_trusted_paths(&self, paths: &[TrustedPath]) {
        self.topology.set_trusted_paths(paths.to_vec());
    }

    /// Install an embedded controller; it is handed our identity and a
    /// sender back-channel
    pub fn set_netconf_master(self: &Arc<Self>, controller: Arc<dyn NetworkController>) {
        controller.init(
            self.identity.clone(),
            self.clone() as Arc<dyn ControllerSender>,
        );
        *self.netconf_master.write() = Some(controller);
    }

    /// Non-cryptographic xorshift128+ PRNG
    pub fn prng(&self) -> u64 {
        let mut state = self.prng_state.lock();
        let mut x = state[0];
        let y = state[1];
        state[0] = y;
        x ^= x << 23;
        let z = x ^ y ^ (x >> 17) ^ (y >> 26);
        state[1] = z;
        z.wrapping_add(y)
    }

    /// Register an outbound packet id awaiting an OK/ECHO reply
    pub fn expect_reply_to(&self, packet_id: u64) {
        self.replies.expect(packet_id);
    }

    /// Consume a reply expectation; true if `packet_id` was awaited
    pub fn expecting_reply_to(&self, packet_id: u64) -> bool {
        self.replies.expecting(packet_id)
    }

    /// WHOIS requests still awaiting an answer (diagnostic)
    pub fn pending_whois_count(&self) -> usize {
        self.sw.pending_whois_count()
    }

    /// Physical-path policy: validity, loop protection against our own
    /// managed IP ranges, then the host's optional veto
    pub fn should_use_path(
        &self,
        token: CallToken,
        address: Address,
        local_socket: i64,
        remote: SocketAddr,
    ) -> bool {
        if !Path::is_address_valid(&remote) {
            return false;
        }
        {
            let networks = self.networks.read();
            let ip = remote.ip();
            if networks.values().any(|n| n.static_ips_contain(&ip)) {
                return false;
            }
        }
        self.host.path_check(token, address, local_socket, remote)
    }

    // ==================
    // Used by the switch
    // ==================

    pub(crate) fn handle_inbound_frame(
        &self,
        token: CallToken,
        from: Address,
        nwid: u64,
        ether_type: u16,
        frame: &[u8],
        _now: u64,
    ) -> Result<(), &'static str> {
        let network = match self.network(nwid) {
            Some(n) => n,
            None => return Err("frame for unjoined network"),
        };
        if !network.gate_inbound(from) {
            self.trace
                .frame_dropped(token, nwid, from, "membership gate");
            return Ok(());
        }
        let source_mac = crate::network::mac_for_address(from, nwid);
        let dest_mac = crate::network::mac_for_address(self.identity.address(), nwid);
        self.host
            .virtual_network_frame(token, nwid, source_mac, dest_mac, ether_type, 0, frame);
        Ok(())
    }

    pub(crate) fn handle_config_request(
        &self,
        token: CallToken,
        nwid: u64,
        from: Address,
        request_packet_id: u64,
        metadata: &[u8],
    ) {
        if Address::from_network_id(nwid) != self.identity.address() {
            debug!(
                nwid = format_args!("{:016x}", nwid),
                "config request for a network we do not control"
            );
            return;
        }
        let master = self.netconf_master.read().clone();
        match master {
            Some(controller) => controller.request(nwid, from, request_packet_id, metadata),
            None => {
                if request_packet_id != 0 {
                    self.sw.send_error_response(
                        token,
                        from,
                        Verb::NetworkConfigRequest,
                        request_packet_id,
                        ERROR_OBJ_NOT_FOUND,
                        nwid,
                        self.now(),
                    );
                }
            }
        }
    }

    pub(crate) fn handle_config_chunk(
        &self,
        token: CallToken,
        from: Address,
        payload: &Bytes,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = payload.clone();
        if p.remaining() < 10 {
            return Err("short NETWORK_CONFIG");
        }
        let nwid = p.get_u64();
        let chunk_len = p.get_u16() as usize;
        if p.remaining() < chunk_len {
            return Err("short NETWORK_CONFIG");
        }
        let chunk = p.copy_to_bytes(chunk_len);
        if p.remaining() < 1 + 8 + 4 + 4 + 1 + 2 {
            return Err("short NETWORK_CONFIG");
        }
        let _flags = p.get_u8();
        let update_id = p.get_u64();
        let total_size = p.get_u32();
        let chunk_index = p.get_u32();
        let _sig_type = p.get_u8();
        let sig_len = p.get_u16() as usize;
        if p.remaining() < sig_len {
            return Err("short NETWORK_CONFIG");
        }
        let signature = p.copy_to_bytes(sig_len);

        let network = match self.network(nwid) {
            Some(n) => n,
            None => return Err("config for unjoined network"),
        };
        let controller = network.controller();
        if from != controller {
            return Err("config from non-controller");
        }

        // The signature covers everything up to the signature block
        let signed = &payload[..payload.len() - 3 - sig_len];
        match self.topology.identity_of(controller) {
            Some(id) => {
                if !id.verify(signed, &signature) {
                    return Err("bad config signature");
                }
            }
            None => {
                // Cannot verify yet: resolve the controller and let the
                // normal refresh cycle retry
                self.sw.request_whois(token, controller, now);
                return Ok(());
            }
        }

        if let Some(config) = network.handle_config_chunk(update_id, total_size, chunk_index, &chunk)
        {
            if config.nwid == nwid {
                network.set_configuration(
                    &self.host,
                    token,
                    self.identity.address(),
                    config,
                    now,
                    true,
                );
            }
        }
        Ok(())
    }

    pub(crate) fn add_membership_credential(
        &self,
        token: CallToken,
        from: Address,
        com: CertificateOfMembership,
        now: u64,
    ) {
        let nwid = com.network_id();
        let network = match self.network(nwid) {
            Some(n) => n,
            None => return,
        };
        let signers = NodeSigners {
            node: self,
            token,
            now,
        };
        match com.verify(&signers) {
            CredentialVerdict::Ok => {
                let member = com.issued_to();
                if network.add_member_com(com) {
                    // Members reach each other's broadcast domain
                    self.multicaster
                        .add(nwid, crate::network::BROADCAST_MAC, 0, member, now);
                }
            }
            CredentialVerdict::WaitingForWhois => {
                debug!(%from, "credential deferred until signer resolves");
            }
            CredentialVerdict::Bad => {
                self.trace
                    .credential_rejected(token, nwid, from, "signature invalid");
            }
        }
    }

    pub(crate) fn apply_revocation(&self, _token: CallToken, from: Address, rev: Revocation) {
        if let Some(network) = self.network(rev.nwid) {
            network.apply_revocation(from, &rev);
        }
    }

    fn request_network_config(&self, token: CallToken, network: &Arc<Network>, now: u64) {
        let nwid = network.nwid();
        let controller = network.controller();
        if controller == self.identity.address() {
            let master = self.netconf_master.read().clone();
            match master {
                Some(ctrl) => ctrl.request(nwid, self.identity.address(), 0, &[]),
                None => {
                    network.set_not_found(&self.host, token, self.identity.address());
                }
            }
            return;
        }

        debug!(
            nwid = format_args!("{:016x}", nwid),
            %controller,
            "requesting network configuration"
        );
        let mut body = BytesMut::new();
        body.put_u64(nwid);
        body.put_u16(0); // no request metadata
        let packet = self
            .sw
            .make_packet(controller, Verb::NetworkConfigRequest, body.freeze());
        self.replies.expect(packet.id);
        self.sw.send(token, packet, now);
    }
}

// Resolves credential signers through the topology, falling back to WHOIS
struct NodeSigners<'a> {
    node: &'a Node,
    token: CallToken,
    now: u64,
}

impl SignerLookup for NodeSigners<'_> {
    fn find_identity(&self, address: Address) -> Option<Identity> {
        self.node.topology.identity_of(address)
    }

    fn request_identity(&self, address: Address) {
        self.node.sw.request_whois(self.token, address, self.now);
    }
}

impl ControllerSender for Node {
    fn nc_send_config(
        &self,
        nwid: u64,
        request_packet_id: u64,
        dest: Address,
        config: &NetworkConfig,
        _legacy_format: bool,
    ) {
        let token = CallToken::default();
        let now = self.now();

        if dest == self.identity.address() {
            if let Some(network) = self.network(nwid) {
                network.set_configuration(
                    &self.host,
                    token,
                    self.identity.address(),
                    config.clone(),
                    now,
                    true,
                );
            }
            return;
        }

        let dict = match bincode::serialize(config) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "could not serialize network config");
                return;
            }
        };

        let mut update_id = self.prng();
        if update_id == 0 {
            update_id = 1;
        }

        // 256 bytes reserved for the trailer fields and signature
        let chunk_capacity = UDP_DEFAULT_PAYLOAD_MTU - 256;
        let total_size = dict.len();
        let mut chunk_index = 0usize;
        while chunk_index < total_size {
            let chunk = &dict[chunk_index..(chunk_index + chunk_capacity).min(total_size)];

            let mut body = BytesMut::new();
            if request_packet_id != 0 {
                body.put_u8(Verb::NetworkConfigRequest as u8);
                body.put_u64(request_packet_id);
            }
            let sig_start = body.len();
            body.put_u64(nwid);
            body.put_u16(chunk.len() as u16);
            body.put_slice(chunk);
            body.put_u8(0); // no flags
            body.put_u64(update_id);
            body.put_u32(total_size as u32);
            body.put_u32(chunk_index as u32);

            let signature = match self.identity.sign(&body[sig_start..]) {
                Ok(s) => s,
                Err(_) => return,
            };
            body.put_u8(1); // signature type: Ed25519
            body.put_u16(signature.len() as u16);
            body.put_slice(&signature);

            let verb = if request_packet_id != 0 {
                Verb::Ok
            } else {
                Verb::NetworkConfig
            };
            self.sw
                .send(token, self.sw.make_packet(dest, verb, body.freeze()), now);
            chunk_index += chunk.len();
        }
    }

    fn nc_send_revocation(&self, dest: Address, rev: &Revocation) {
        let token = CallToken::default();
        if dest == self.identity.address() {
            if let Some(network) = self.network(rev.nwid) {
                network.apply_revocation(self.identity.address(), rev);
            }
            return;
        }
        let mut body = BytesMut::new();
        body.put_u16(0); // certificates of membership
        body.put_u16(0); // capabilities
        body.put_u16(0); // tags
        body.put_u16(1); // revocations
        rev.encode(&mut body);
        let packet = self
            .sw
            .make_packet(dest, Verb::NetworkCredentials, body.freeze());
        self.sw.send(token, packet, self.now());
    }

    fn nc_send_error(&self, nwid: u64, request_packet_id: u64, dest: Address, code: NcErrorCode) {
        let token = CallToken::default();
        if dest == self.identity.address() {
            if let Some(network) = self.network(nwid) {
                match code {
                    NcErrorCode::ObjectNotFound | NcErrorCode::InternalServerError => {
                        network.set_not_found(&self.host, token, self.identity.address())
                    }
                    NcErrorCode::AccessDenied => {
                        network.set_access_denied(&self.host, token, self.identity.address())
                    }
                }
            }
        } else if request_packet_id != 0 {
            let wire_code = match code {
                NcErrorCode::AccessDenied => ERROR_NETWORK_ACCESS_DENIED,
                _ => ERROR_OBJ_NOT_FOUND,
            };
            self.sw.send_error_response(
                token,
                dest,
                Verb::NetworkConfigRequest,
                request_packet_id,
                wire_code,
                nwid,
                self.now(),
            );
        }
        // No request id and a remote destination: nothing to answer
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.secret_identity_str.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHost;

    impl NodeHost for NullHost {
        fn state_object_get(
            &self,
            _: CallToken,
            _: StateObjectType,
            _: [u64; 2],
        ) -> Option<Vec<u8>> {
            None
        }
        fn state_object_put(&self, _: CallToken, _: StateObjectType, _: [u64; 2], _: &[u8]) {}
        fn state_object_delete(&self, _: CallToken, _: StateObjectType, _: [u64; 2]) {}
        fn wire_packet_send(&self, _: CallToken, _: i64, _: SocketAddr, _: &[u8], _: u32) -> bool {
            true
        }
        fn virtual_network_frame(
            &self,
            _: CallToken,
            _: u64,
            _: u64,
            _: u64,
            _: u16,
            _: u16,
            _: &[u8],
        ) {
        }
        fn virtual_network_config(
            &self,
            _: CallToken,
            _: u64,
            _: VirtualNetworkConfigOperation,
            _: &VirtualNetworkConfig,
        ) {
        }
        fn post_event(&self, _: CallToken, _: Event) {}
    }

    #[test]
    fn test_prng_is_nonzero_and_varies() {
        let node = Node::new(Arc::new(NullHost), CallToken::default(), 1).unwrap();
        let a = node.prng();
        let b = node.prng();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reply_expectation_via_node() {
        let node = Node::new(Arc::new(NullHost), CallToken::default(), 1).unwrap();
        node.expect_reply_to(77);
        assert!(node.expecting_reply_to(77));
        assert!(!node.expecting_reply_to(77));
    }

    #[test]
    fn test_local_interface_addresses_are_a_set() {
        let node = Node::new(Arc::new(NullHost), CallToken::default(), 1).unwrap();
        let addr: SocketAddr = "192.0.2.10:9993".parse().unwrap();
        assert!(node.add_local_interface_address(addr));
        assert!(!node.add_local_interface_address(addr));
        assert!(!node.add_local_interface_address("0.0.0.0:9993".parse().unwrap()));
        assert_eq!(node.local_interface_addresses(), vec![addr]);
        node.clear_local_interface_addresses();
        assert!(node.local_interface_addresses().is_empty());
    }
}
