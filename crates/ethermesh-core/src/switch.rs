//! Packet Router
//!
//! Wire format:
//! `[Packet ID: 8][Destination: 5][Source: 5][Verb: 1][Payload: variable]`
//!
//! The switch parses inbound datagrams, learns peers and paths from HELLO,
//! answers ECHO/WHOIS, delivers frames and credentials to their networks,
//! and routes outbound packets over the best known path (falling back to the
//! best upstream as relay). Malformed input is dropped and traced, never
//! surfaced: a corrupt datagram is not a system fault.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use tracing::{debug, trace};

use ethermesh_crypto::{Address, CertificateOfMembership, Identity, ADDRESS_LENGTH};

use crate::host::{CallToken, Event, NodeHost};
use crate::netconf::Revocation;
use crate::node::Node;
use crate::trace::Trace;
use crate::{
    MAX_WHOIS_RETRIES, PROTOCOL_VERSION, VERSION_MAJOR, VERSION_MINOR, VERSION_REVISION,
    WHOIS_RETRY_DELAY,
};

/// Packet verb identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Verb {
    Hello = 0x01,
    Ok = 0x02,
    Error = 0x03,
    Echo = 0x04,
    Whois = 0x05,
    NetworkConfigRequest = 0x06,
    NetworkConfig = 0x07,
    NetworkCredentials = 0x08,
    UserMessage = 0x09,
    Frame = 0x0a,
}

impl TryFrom<u8> for Verb {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Self::Hello),
            0x02 => Ok(Self::Ok),
            0x03 => Ok(Self::Error),
            0x04 => Ok(Self::Echo),
            0x05 => Ok(Self::Whois),
            0x06 => Ok(Self::NetworkConfigRequest),
            0x07 => Ok(Self::NetworkConfig),
            0x08 => Ok(Self::NetworkCredentials),
            0x09 => Ok(Self::UserMessage),
            0x0a => Ok(Self::Frame),
            _ => Err(()),
        }
    }
}

/// Wire error codes carried in ERROR packets
pub const ERROR_OBJ_NOT_FOUND: u8 = 0x01;
pub const ERROR_NETWORK_ACCESS_DENIED: u8 = 0x02;

/// Minimum packet size (id + dest + src + verb)
pub const MIN_PACKET_SIZE: usize = 8 + ADDRESS_LENGTH * 2 + 1;

/// An overlay packet
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: u64,
    pub dest: Address,
    pub src: Address,
    pub verb: Verb,
    pub payload: Bytes,
}

impl Packet {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MIN_PACKET_SIZE + self.payload.len());
        buf.put_u64(self.id);
        self.dest.append_to(&mut buf);
        self.src.append_to(&mut buf);
        buf.put_u8(self.verb as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn from_bytes(mut bytes: Bytes) -> Result<Self, &'static str> {
        if bytes.len() < MIN_PACKET_SIZE {
            return Err("packet too short");
        }
        let id = bytes.get_u64();
        let dest = Address::read_from(&mut bytes).map_err(|_| "bad destination")?;
        let src = Address::read_from(&mut bytes).map_err(|_| "bad source")?;
        let verb = Verb::try_from(bytes.get_u8()).map_err(|_| "unknown verb")?;
        Ok(Self {
            id,
            dest,
            src,
            verb,
            payload: bytes,
        })
    }
}

/// Bucketed ring of packet ids we expect OK/ECHO replies to
///
/// An id registered with `expect` is matched at most once by `expecting`.
pub struct ExpectingReplies {
    buckets: [Mutex<ReplyBucket>; Self::BUCKETS],
}

struct ReplyBucket {
    ids: [u64; ExpectingReplies::RING],
    next: usize,
}

impl ExpectingReplies {
    const BUCKETS: usize = 32;
    const RING: usize = 32;

    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| {
                Mutex::new(ReplyBucket {
                    ids: [0; Self::RING],
                    next: 0,
                })
            }),
        }
    }

    fn bucket_of(id: u64) -> usize {
        ((id ^ (id >> 32)) as usize) % Self::BUCKETS
    }

    /// Register an outbound packet id awaiting a reply
    pub fn expect(&self, packet_id: u64) {
        let mut bucket = self.buckets[Self::bucket_of(packet_id)].lock();
        let next = bucket.next;
        bucket.ids[next] = packet_id;
        bucket.next = (next + 1) % Self::RING;
    }

    /// Consume an expectation; true if `packet_id` was awaited
    pub fn expecting(&self, packet_id: u64) -> bool {
        if packet_id == 0 {
            return false;
        }
        let mut bucket = self.buckets[Self::bucket_of(packet_id)].lock();
        for slot in bucket.ids.iter_mut() {
            if *slot == packet_id {
                *slot = 0;
                return true;
            }
        }
        false
    }
}

impl Default for ExpectingReplies {
    fn default() -> Self {
        Self::new()
    }
}

struct WhoisRequest {
    last_sent: u64,
    retries: u32,
}

/// The packet router
pub struct Switch {
    host: Arc<dyn NodeHost>,
    identity: Identity,
    trace: Arc<Trace>,
    replies: Arc<ExpectingReplies>,
    node: RwLock<Weak<Node>>,
    whois_requests: Mutex<HashMap<Address, WhoisRequest>>,
    next_packet_id: AtomicU64,
}

impl Switch {
    pub fn new(
        host: Arc<dyn NodeHost>,
        identity: Identity,
        trace: Arc<Trace>,
        replies: Arc<ExpectingReplies>,
    ) -> Self {
        let mut seed = rand::rngs::OsRng.next_u64();
        if seed == 0 {
            seed = 1;
        }
        Self {
            host,
            identity,
            trace,
            replies,
            node: RwLock::new(Weak::new()),
            whois_requests: Mutex::new(HashMap::new()),
            next_packet_id: AtomicU64::new(seed),
        }
    }

    /// Install the back-reference to the owning node
    pub fn attach(&self, node: &Arc<Node>) {
        *self.node.write() = Arc::downgrade(node);
    }

    fn node(&self) -> Option<Arc<Node>> {
        self.node.read().upgrade()
    }

    fn packet_id(&self) -> u64 {
        // Never zero: zero means "no packet" in reply bookkeeping
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn new_packet(&self, dest: Address, verb: Verb, payload: Bytes) -> Packet {
        Packet {
            id: self.packet_id(),
            dest,
            src: self.identity.address(),
            verb,
            payload,
        }
    }

    // ==================
    // Inbound
    // ==================

    /// Process one inbound UDP datagram; all parse errors are swallowed
    pub fn on_remote_packet(
        &self,
        token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        data: &[u8],
        now: u64,
    ) {
        // Runt datagrams are line noise; drop them without even a trace event
        if data.len() < MIN_PACKET_SIZE {
            trace!(%remote, len = data.len(), "ignoring runt datagram");
            return;
        }
        let packet = match Packet::from_bytes(Bytes::copy_from_slice(data)) {
            Ok(p) => p,
            Err(reason) => {
                self.trace
                    .incoming_packet_dropped(token, remote, reason);
                return;
            }
        };
        if packet.dest != self.identity.address() {
            trace!(dest = %packet.dest, "dropping packet not addressed to us");
            return;
        }
        let node = match self.node() {
            Some(n) => n,
            None => return,
        };

        let result = match packet.verb {
            Verb::Hello => self.handle_hello(&node, token, local_socket, remote, &packet, now),
            Verb::Ok => self.handle_ok(&node, token, local_socket, remote, &packet, now),
            Verb::Error => self.handle_error(&node, token, &packet),
            Verb::Echo => self.handle_echo(&node, token, local_socket, remote, &packet, now),
            Verb::Whois => self.handle_whois(&node, token, &packet, now),
            Verb::NetworkConfigRequest => self.handle_config_request(&node, token, &packet),
            Verb::NetworkConfig => self.handle_network_config(&node, token, &packet, now),
            Verb::NetworkCredentials => self.handle_credentials(&node, token, &packet, now),
            Verb::UserMessage => self.handle_user_message(token, &packet),
            Verb::Frame => self.handle_frame(&node, token, &packet, now),
        };
        if let Err(reason) = result {
            self.trace.incoming_packet_dropped(token, remote, reason);
        } else if packet.verb != Verb::Hello {
            // HELLO learns its own path after identity validation
            if let Some(peer) = node.topology().get_peer(packet.src) {
                peer.received(local_socket, remote, now);
            }
        }
    }

    fn handle_hello(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 13 {
            return Err("short HELLO");
        }
        let proto = p.get_u8();
        let major = p.get_u8();
        let minor = p.get_u8();
        let revision = p.get_u16();
        let timestamp = p.get_u64();
        let id_len = if p.remaining() >= 2 {
            p.get_u16() as usize
        } else {
            return Err("short HELLO");
        };
        if p.remaining() < id_len {
            return Err("short HELLO");
        }
        let id_text =
            std::str::from_utf8(&p.copy_to_bytes(id_len)).map_err(|_| "HELLO identity utf8")?
                .to_owned();
        let identity = Identity::from_text(&id_text).map_err(|_| "HELLO identity invalid")?;
        if identity.address() != packet.src {
            return Err("HELLO source/identity mismatch");
        }

        let peer = node.topology().add_peer(identity);
        peer.set_version(crate::peer::PeerVersion {
            proto,
            major,
            minor,
            revision,
        });
        if node.should_use_path(token, packet.src, local_socket, remote) {
            peer.received(local_socket, remote, now);
        }

        // OK(HELLO) echoes the timestamp so the peer can measure latency,
        // and tells the peer what its external address looks like from here
        let mut body = BytesMut::new();
        body.put_u8(Verb::Hello as u8);
        body.put_u64(packet.id);
        body.put_u64(timestamp);
        body.put_u8(PROTOCOL_VERSION);
        body.put_u8(VERSION_MAJOR);
        body.put_u8(VERSION_MINOR);
        body.put_u16(VERSION_REVISION);
        let observed = remote.to_string();
        body.put_u16(observed.len() as u16);
        body.put_slice(observed.as_bytes());
        let ok = self.new_packet(packet.src, Verb::Ok, body.freeze());
        self.host
            .wire_packet_send(token, local_socket, remote, &ok.to_bytes(), 0);
        Ok(())
    }

    fn handle_ok(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 9 {
            return Err("short OK");
        }
        let in_re_verb = Verb::try_from(p.get_u8()).map_err(|_| "OK in-re verb")?;
        let in_re_id = p.get_u64();
        if !self.replies.expecting(in_re_id) {
            return Err("unexpected OK");
        }

        match in_re_verb {
            Verb::Hello => {
                if p.remaining() < 13 {
                    return Err("short OK(HELLO)");
                }
                let sent_at = p.get_u64();
                let proto = p.get_u8();
                let major = p.get_u8();
                let minor = p.get_u8();
                let revision = p.get_u16();
                if let Some(peer) = node.topology().get_peer(packet.src) {
                    peer.record_latency(now.saturating_sub(sent_at).min(u64::from(u16::MAX)) as u16);
                    peer.set_version(crate::peer::PeerVersion {
                        proto,
                        major,
                        minor,
                        revision,
                    });
                    peer.received(local_socket, remote, now);
                }
                // The responder reports how our address looks from outside
                if p.remaining() >= 2 {
                    let len = p.get_u16() as usize;
                    if p.remaining() >= len {
                        if let Ok(text) = std::str::from_utf8(&p.copy_to_bytes(len)) {
                            if let Ok(external) = text.parse() {
                                node.self_awareness()
                                    .iam(packet.src, local_socket, external, now);
                            }
                        }
                    }
                }
            }
            Verb::Whois => {
                if p.remaining() < 2 {
                    return Err("short OK(WHOIS)");
                }
                let id_len = p.get_u16() as usize;
                if p.remaining() < id_len {
                    return Err("short OK(WHOIS)");
                }
                let text = std::str::from_utf8(&p.copy_to_bytes(id_len))
                    .map_err(|_| "WHOIS identity utf8")?
                    .to_owned();
                let identity =
                    Identity::from_text(&text).map_err(|_| "WHOIS identity invalid")?;
                self.whois_requests.lock().remove(&identity.address());
                node.topology().add_peer(identity);
            }
            Verb::NetworkConfigRequest => {
                let chunk = p.copy_to_bytes(p.remaining());
                node.handle_config_chunk(token, packet.src, &chunk, now)?;
            }
            Verb::Echo => {}
            _ => {}
        }
        Ok(())
    }

    fn handle_error(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 10 {
            return Err("short ERROR");
        }
        let in_re_verb = Verb::try_from(p.get_u8()).map_err(|_| "ERROR in-re verb")?;
        let _in_re_id = p.get_u64();
        let code = p.get_u8();
        if in_re_verb == Verb::NetworkConfigRequest && p.remaining() >= 8 {
            let nwid = p.get_u64();
            if let Some(network) = node.network(nwid) {
                // Only the network's controller may deny or disown it
                if Address::from_network_id(nwid) == packet.src {
                    let me = self.identity.address();
                    match code {
                        ERROR_NETWORK_ACCESS_DENIED => {
                            network.set_access_denied(&self.host, token, me)
                        }
                        _ => network.set_not_found(&self.host, token, me),
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_echo(
        &self,
        _node: &Arc<Node>,
        token: CallToken,
        local_socket: i64,
        remote: SocketAddr,
        packet: &Packet,
        _now: u64,
    ) -> Result<(), &'static str> {
        let mut body = BytesMut::new();
        body.put_u8(Verb::Echo as u8);
        body.put_u64(packet.id);
        let ok = self.new_packet(packet.src, Verb::Ok, body.freeze());
        self.host
            .wire_packet_send(token, local_socket, remote, &ok.to_bytes(), 0);
        Ok(())
    }

    fn handle_whois(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        let wanted = Address::read_from(&mut p).map_err(|_| "short WHOIS")?;
        match node.topology().identity_of(wanted) {
            Some(identity) => {
                let text = identity
                    .to_text(false)
                    .map_err(|_| "identity text")?;
                let mut body = BytesMut::new();
                body.put_u8(Verb::Whois as u8);
                body.put_u64(packet.id);
                body.put_u16(text.len() as u16);
                body.put_slice(text.as_bytes());
                self.send(token, self.new_packet(packet.src, Verb::Ok, body.freeze()), now);
            }
            None => {
                self.send_error(token, packet.src, Verb::Whois, packet.id, ERROR_OBJ_NOT_FOUND, 0, now);
            }
        }
        Ok(())
    }

    fn handle_config_request(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 10 {
            return Err("short NETWORK_CONFIG_REQUEST");
        }
        let nwid = p.get_u64();
        let md_len = p.get_u16() as usize;
        if p.remaining() < md_len {
            return Err("short NETWORK_CONFIG_REQUEST");
        }
        let metadata = p.copy_to_bytes(md_len);
        node.handle_config_request(token, nwid, packet.src, packet.id, &metadata);
        Ok(())
    }

    fn handle_network_config(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        node.handle_config_chunk(token, packet.src, &packet.payload, now)
    }

    fn handle_credentials(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 2 {
            return Err("short NETWORK_CREDENTIALS");
        }
        let com_count = p.get_u16() as usize;
        for _ in 0..com_count {
            let com = CertificateOfMembership::decode(&mut p)
                .map_err(|_| "bad COM in NETWORK_CREDENTIALS")?;
            node.add_membership_credential(token, packet.src, com, now);
        }
        if p.remaining() < 6 {
            return Err("short NETWORK_CREDENTIALS");
        }
        let _capabilities = p.get_u16();
        let _tags = p.get_u16();
        let rev_count = p.get_u16() as usize;
        for _ in 0..rev_count {
            let rev = Revocation::decode(&mut p).ok_or("bad revocation")?;
            node.apply_revocation(token, packet.src, rev);
        }
        Ok(())
    }

    fn handle_user_message(
        &self,
        token: CallToken,
        packet: &Packet,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 8 {
            return Err("short USER_MESSAGE");
        }
        let type_id = p.get_u64();
        self.host.post_event(
            token,
            Event::UserMessage {
                source: packet.src,
                type_id,
                payload: p.to_vec(),
            },
        );
        Ok(())
    }

    fn handle_frame(
        &self,
        node: &Arc<Node>,
        token: CallToken,
        packet: &Packet,
        now: u64,
    ) -> Result<(), &'static str> {
        let mut p = packet.payload.clone();
        if p.remaining() < 10 {
            return Err("short FRAME");
        }
        let nwid = p.get_u64();
        let ether_type = p.get_u16();
        node.handle_inbound_frame(token, packet.src, nwid, ether_type, &p.copy_to_bytes(p.remaining()), now)
    }

    // ==================
    // Outbound
    // ==================

    /// Route an Ethernet frame from the local tap onto the overlay
    #[allow(clippy::too_many_arguments)]
    pub fn on_local_ethernet(
        &self,
        token: CallToken,
        network: &Arc<crate::network::Network>,
        _source_mac: u64,
        dest_mac: u64,
        ether_type: u16,
        _vlan_id: u16,
        frame: &[u8],
        now: u64,
    ) {
        let node = match self.node() {
            Some(n) => n,
            None => return,
        };
        let nwid = network.nwid();
        if !network.gate_outbound() {
            self.trace
                .frame_dropped(token, nwid, self.identity.address(), "network not ready");
            return;
        }

        let mut targets: Vec<Address> = if crate::network::is_multicast_mac(dest_mac) {
            node.multicaster().members(nwid, dest_mac, 0, now)
        } else {
            vec![crate::network::address_from_mac(dest_mac, nwid)]
        };
        targets.retain(|a| *a != self.identity.address() && a.is_valid());

        for dest in targets {
            let mut body = BytesMut::with_capacity(10 + frame.len());
            body.put_u64(nwid);
            body.put_u16(ether_type);
            body.put_slice(frame);
            self.send(token, self.new_packet(dest, Verb::Frame, body.freeze()), now);
        }
    }

    /// Send a HELLO announcing our identity to a specific endpoint
    pub fn send_hello(
        &self,
        token: CallToken,
        dest: Address,
        local_socket: i64,
        at_address: SocketAddr,
        now: u64,
    ) {
        let text = match self.identity.to_text(false) {
            Ok(t) => t,
            Err(_) => return,
        };
        let mut body = BytesMut::new();
        body.put_u8(PROTOCOL_VERSION);
        body.put_u8(VERSION_MAJOR);
        body.put_u8(VERSION_MINOR);
        body.put_u16(VERSION_REVISION);
        body.put_u64(now);
        body.put_u16(text.len() as u16);
        body.put_slice(text.as_bytes());
        let packet = self.new_packet(dest, Verb::Hello, body.freeze());
        self.replies.expect(packet.id);
        self.host
            .wire_packet_send(token, local_socket, at_address, &packet.to_bytes(), 0);
    }

    /// Send a lightweight ECHO keepalive to a specific endpoint
    pub fn send_echo(
        &self,
        token: CallToken,
        dest: Address,
        local_socket: i64,
        at_address: SocketAddr,
    ) {
        let packet = self.new_packet(dest, Verb::Echo, Bytes::new());
        self.replies.expect(packet.id);
        self.host
            .wire_packet_send(token, local_socket, at_address, &packet.to_bytes(), 0);
    }

    fn send_error(
        &self,
        token: CallToken,
        dest: Address,
        in_re_verb: Verb,
        in_re_id: u64,
        code: u8,
        nwid: u64,
        now: u64,
    ) {
        let mut body = BytesMut::new();
        body.put_u8(in_re_verb as u8);
        body.put_u64(in_re_id);
        body.put_u8(code);
        body.put_u64(nwid);
        self.send(token, self.new_packet(dest, Verb::Error, body.freeze()), now);
    }

    /// Send an ERROR in response to a recorded request packet
    pub fn send_error_response(
        &self,
        token: CallToken,
        dest: Address,
        in_re_verb: Verb,
        in_re_id: u64,
        code: u8,
        nwid: u64,
        now: u64,
    ) {
        self.send_error(token, dest, in_re_verb, in_re_id, code, nwid, now);
    }

    /// Build a fresh outbound packet addressed from us
    pub fn make_packet(&self, dest: Address, verb: Verb, payload: Bytes) -> Packet {
        self.new_packet(dest, verb, payload)
    }

    /// Route a packet: best direct path first, then via the best upstream
    pub fn send(&self, token: CallToken, packet: Packet, now: u64) {
        let node = match self.node() {
            Some(n) => n,
            None => return,
        };
        let topology = node.topology();

        let via = topology
            .get_peer(packet.dest)
            .and_then(|p| p.best_path(now, false))
            .or_else(|| {
                topology
                    .best_upstream()
                    .and_then(|up| up.best_path(now, true))
            });

        match via {
            Some(path) => {
                self.host.wire_packet_send(
                    token,
                    path.local_socket(),
                    path.address(),
                    &packet.to_bytes(),
                    0,
                );
                path.sent(now);
            }
            None => {
                debug!(dest = %packet.dest, verb = ?packet.verb, "no route to destination");
                self.request_whois(token, packet.dest, now);
            }
        }
    }

    /// Ask an upstream for the identity behind an address
    pub fn request_whois(&self, token: CallToken, address: Address, now: u64) {
        if address == self.identity.address() {
            return;
        }
        {
            let mut reqs = self.whois_requests.lock();
            let req = reqs.entry(address).or_insert(WhoisRequest {
                last_sent: 0,
                retries: 0,
            });
            if now.saturating_sub(req.last_sent) < WHOIS_RETRY_DELAY {
                return;
            }
            req.last_sent = now;
        }
        self.send_whois_now(token, address, now);
    }

    fn send_whois_now(&self, token: CallToken, address: Address, now: u64) {
        let node = match self.node() {
            Some(n) => n,
            None => return,
        };
        let upstream = match node.topology().best_upstream() {
            Some(up) => up,
            None => {
                trace!(%address, "WHOIS deferred: no upstream");
                return;
            }
        };
        let path = match upstream.best_path(now, true) {
            Some(p) => p,
            None => {
                trace!(%address, "WHOIS deferred: no upstream path");
                return;
            }
        };
        let mut body = BytesMut::new();
        address.append_to(&mut body);
        let packet = self.new_packet(upstream.address(), Verb::Whois, body.freeze());
        self.replies.expect(packet.id);
        self.host.wire_packet_send(
            token,
            path.local_socket(),
            path.address(),
            &packet.to_bytes(),
            0,
        );
        path.sent(now);
    }

    /// Retry pending WHOIS requests; returns ms until the next timed task
    pub fn do_timer_tasks(&self, token: CallToken, now: u64) -> u64 {
        let due: Vec<Address> = {
            let mut reqs = self.whois_requests.lock();
            reqs.retain(|_, r| r.retries < MAX_WHOIS_RETRIES);
            reqs.iter_mut()
                .filter(|(_, r)| now.saturating_sub(r.last_sent) >= WHOIS_RETRY_DELAY)
                .map(|(a, r)| {
                    r.last_sent = now;
                    r.retries += 1;
                    *a
                })
                .collect()
        };
        for address in due {
            self.send_whois_now(token, address, now);
        }
        if self.whois_requests.lock().is_empty() {
            u64::MAX
        } else {
            WHOIS_RETRY_DELAY
        }
    }

    /// Number of WHOIS requests still awaiting an answer
    pub fn pending_whois_count(&self) -> usize {
        self.whois_requests.lock().len()
    }
}
