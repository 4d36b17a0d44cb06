//! Node lifecycle: identity persistence, join/leave, input containment

mod common;

use common::MockHost;
use ethermesh_core::{
    CallToken, Event, Node, ResultCode, StateObjectType, VirtualNetworkConfigOperation,
};

const NWID: u64 = 0xdeadbeef00000001;

fn token() -> CallToken {
    CallToken(1)
}

#[test]
fn identity_persists_across_reconstruction() {
    let host = MockHost::new();

    let first_address = {
        let node = Node::new(host.clone(), token(), 1000).unwrap();
        assert_eq!(host.event_count(&Event::Up), 1);
        node.address()
    };

    // Both identity forms must have been written out
    {
        let state = host.state.lock();
        assert!(state.contains_key(&(StateObjectType::IdentitySecret, 0)));
        assert!(state.contains_key(&(StateObjectType::IdentityPublic, 0)));
    }

    // A node rebuilt over the same state store keeps its address
    let node = Node::new(host.clone(), token(), 2000).unwrap();
    assert_eq!(node.address(), first_address);

    let status = node.status();
    assert_eq!(status.address, first_address);
    assert!(status.public_identity.starts_with(&first_address.to_hex()));
    assert!(status.secret_identity.starts_with(&first_address.to_hex()));
    assert!(!status.online);
}

#[test]
fn join_is_idempotent_and_leave_destroys_port() {
    let host = MockHost::new();
    let node = Node::new(host.clone(), token(), 1000).unwrap();

    assert_eq!(node.join(token(), NWID), ResultCode::Ok);
    assert_eq!(node.join(token(), NWID), ResultCode::Ok);
    assert_eq!(node.networks().networks.len(), 1);
    assert!(node.network_config(NWID).is_some());

    assert_eq!(node.leave(token(), NWID), ResultCode::Ok);
    assert!(node.network_config(NWID).is_none());
    assert!(host
        .config_ops
        .lock()
        .contains(&(NWID, VirtualNetworkConfigOperation::Destroy)));

    // Leaving again is still OK
    assert_eq!(node.leave(token(), NWID), ResultCode::Ok);
}

#[test]
fn frame_for_unknown_network_is_reported() {
    let host = MockHost::new();
    let node = Node::new(host, token(), 1000).unwrap();

    let mut deadline = 0u64;
    let rc = node.process_virtual_network_frame(
        token(),
        1000,
        NWID,
        0x0202_0000_0001,
        0x0202_0000_0002,
        0x0800,
        0,
        &[0u8; 64],
        &mut deadline,
    );
    assert_eq!(rc, ResultCode::NetworkNotFound);
}

#[test]
fn garbage_wire_packet_is_swallowed() {
    let host = MockHost::new();
    let node = Node::new(host.clone(), token(), 1000).unwrap();
    let events_before = host.events.lock().len();
    let networks_before = node.networks();

    let mut deadline = 0u64;
    let rc = node.process_wire_packet(
        token(),
        1001,
        -1,
        "192.0.2.99:9993".parse().unwrap(),
        &[0xff],
        &mut deadline,
    );

    assert_eq!(rc, ResultCode::Ok);
    assert_eq!(host.events.lock().len(), events_before);
    assert_eq!(host.sent.lock().len(), 0);
    assert_eq!(node.networks(), networks_before);
}

#[test]
fn multicast_subscribe_requires_membership() {
    let host = MockHost::new();
    let node = Node::new(host, token(), 1000).unwrap();

    assert_eq!(
        node.multicast_subscribe(token(), NWID, 0xffffffffffff, 0),
        ResultCode::NetworkNotFound
    );
    node.join(token(), NWID);
    assert_eq!(
        node.multicast_subscribe(token(), NWID, 0xffffffffffff, 0),
        ResultCode::Ok
    );
    assert_eq!(
        node.multicast_unsubscribe(token(), NWID, 0xffffffffffff, 0),
        ResultCode::Ok
    );
}

#[test]
fn user_message_to_self_is_rejected() {
    let host = MockHost::new();
    let node = Node::new(host.clone(), token(), 1000).unwrap();
    assert!(!node.send_user_message(token(), node.address(), 7, b"loopback"));
}
