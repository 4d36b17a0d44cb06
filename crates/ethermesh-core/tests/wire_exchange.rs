//! Two nodes talking over a simulated wire: HELLO handshake, peer learning,
//! reply matching, user messages

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::MockHost;
use ethermesh_core::{CallToken, Event, Node, Root, World, PING_CHECK_INTERVAL};

fn token() -> CallToken {
    CallToken(1)
}

// Deliver every packet one host has queued into the other node, as if it
// arrived from `from_addr`
fn pump(from: &Arc<MockHost>, to: &Arc<Node>, from_addr: SocketAddr, now: u64) -> usize {
    let packets: Vec<Vec<u8>> = from.sent.lock().drain(..).map(|p| p.data).collect();
    let count = packets.len();
    let mut deadline = 0u64;
    for data in packets {
        to.process_wire_packet(token(), now, -1, from_addr, &data, &mut deadline);
    }
    count
}

#[test]
fn hello_exchange_establishes_peers_and_routes_messages() {
    let host_a = MockHost::new();
    let node_a = Node::new(host_a.clone(), token(), 1000).unwrap();
    let host_b = MockHost::new();
    let node_b = Node::new(host_b.clone(), token(), 1000).unwrap();

    let a_addr: SocketAddr = "203.0.113.1:9993".parse().unwrap();
    let b_addr: SocketAddr = "198.51.100.1:9993".parse().unwrap();

    // B is A's planet root
    node_a.topology().set_planet(World {
        id: 1,
        timestamp: 1,
        roots: vec![Root {
            address: node_b.address(),
            identity: Some(node_b.identity().public_clone()),
            stable_endpoints: vec![b_addr],
        }],
    });
    node_a.topology().add_peer(node_b.identity().public_clone());

    // A's tick HELLOs its upstream; B answers with OK(HELLO)
    let now = PING_CHECK_INTERVAL + 1000;
    let mut deadline = 0u64;
    node_a.process_background_tasks(token(), now, &mut deadline);
    assert!(pump(&host_a, &node_b, a_addr, now) > 0);
    assert!(pump(&host_b, &node_a, b_addr, now) > 0);

    // B learned A from the HELLO; A matched the reply and learned versions
    let b_peers = node_b.peers();
    assert_eq!(b_peers.peers.len(), 1);
    assert_eq!(b_peers.peers[0].address, node_a.address());

    let a_view = node_a.peers();
    assert_eq!(a_view.peers.len(), 1);
    assert_ne!(a_view.peers[0].version_major, -1);
    assert!(!a_view.peers[0].paths.is_empty());

    // B's OK(HELLO) reported how A looks from outside
    assert_eq!(node_a.external_addresses(), vec![a_addr]);

    // With a live path, a user message reaches B as an event
    assert!(node_a.send_user_message(token(), node_b.address(), 0x1234, b"ping"));
    pump(&host_a, &node_b, a_addr, now + 10);
    let delivered = host_b.events.lock().iter().any(|e| {
        matches!(
            e,
            Event::UserMessage { source, type_id, payload }
                if *source == node_a.address() && *type_id == 0x1234 && payload == b"ping"
        )
    });
    assert!(delivered);
}

#[test]
fn replayed_ok_replies_are_dropped() {
    let host_a = MockHost::new();
    let node_a = Node::new(host_a.clone(), token(), 1000).unwrap();
    let host_b = MockHost::new();
    let node_b = Node::new(host_b.clone(), token(), 1000).unwrap();

    let a_addr: SocketAddr = "203.0.113.1:9993".parse().unwrap();
    let b_addr: SocketAddr = "198.51.100.1:9993".parse().unwrap();

    // A is B's planet root; B's tick HELLOs it
    node_b.topology().set_planet(World {
        id: 1,
        timestamp: 1,
        roots: vec![Root {
            address: node_a.address(),
            identity: Some(node_a.identity().public_clone()),
            stable_endpoints: vec![a_addr],
        }],
    });
    node_b.topology().add_peer(node_a.identity().public_clone());

    let now = PING_CHECK_INTERVAL + 1000;
    let mut deadline = 0u64;
    node_b.process_background_tasks(token(), now, &mut deadline);
    pump(&host_b, &node_a, b_addr, now);

    let ok_packets: Vec<Vec<u8>> = host_a.sent.lock().iter().map(|p| p.data.clone()).collect();
    assert!(!ok_packets.is_empty());

    // First delivery consumes the reply expectation; the replay is dropped
    // without disturbing peer state
    for data in &ok_packets {
        node_b.process_wire_packet(token(), now + 1, -1, a_addr, data, &mut deadline);
    }
    let peers_after_first = node_b.peers();
    for data in &ok_packets {
        node_b.process_wire_packet(token(), now + 2, -1, a_addr, data, &mut deadline);
    }
    assert_eq!(node_b.peers().peers.len(), peers_after_first.peers.len());
    assert_eq!(peers_after_first.peers[0].address, node_a.address());
}
