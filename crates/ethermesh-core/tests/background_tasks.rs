//! The periodic maintenance loop: config refresh, upstream pings, online
//! transitions, deadline floor

mod common;

use common::MockHost;
use ethermesh_core::switch::Verb;
use ethermesh_core::{
    CallToken, Event, Node, ResultCode, Root, World, PING_CHECK_INTERVAL, TIMER_GRANULARITY,
};
use ethermesh_crypto::Identity;

const NWID: u64 = 0xdeadbeef00000001;

fn token() -> CallToken {
    CallToken(1)
}

// A node with one planet root ("upstream") that already has a peer record
// and one known IPv4 path
fn node_with_upstream() -> (std::sync::Arc<MockHost>, std::sync::Arc<Node>, Identity) {
    let host = MockHost::new();
    let node = Node::new(host.clone(), token(), 1000).unwrap();

    let root = Identity::generate();
    node.topology().set_planet(World {
        id: 1,
        timestamp: 1,
        roots: vec![Root {
            address: root.address(),
            identity: Some(root.public_clone()),
            stable_endpoints: vec![
                "198.51.100.1:9993".parse().unwrap(),
                "[2001:db8::1]:9993".parse().unwrap(),
            ],
        }],
    });

    let peer = node.topology().add_peer(root.public_clone());
    peer.received(-1, "198.51.100.1:9993".parse().unwrap(), 990);

    (host, node, root)
}

#[test]
fn tick_requests_config_pings_upstreams_and_goes_online() {
    let (host, node, root) = node_with_upstream();
    node.join(token(), NWID);

    let now = PING_CHECK_INTERVAL + 1000;
    let mut deadline = 0u64;
    assert_eq!(
        node.process_background_tasks(token(), now, &mut deadline),
        ResultCode::Ok
    );

    let verbs = host.sent_verbs();

    // A network with no config gets a request routed toward its controller
    assert!(verbs.contains(&(Verb::NetworkConfigRequest as u8)));

    // The upstream was inactive on both families at tick time: one HELLO
    // per family to a stable endpoint
    let hellos: Vec<_> = host
        .sent
        .lock()
        .iter()
        .filter(|p| p.verb() == Verb::Hello as u8 && p.dest() == root.address())
        .map(|p| p.remote)
        .collect();
    assert!(hellos.iter().any(|a| a.is_ipv4()));
    assert!(hellos.iter().any(|a| a.is_ipv6()));

    // Heard from the upstream recently: we are online, announced once
    assert_eq!(host.event_count(&Event::Online), 1);
    assert!(node.status().online);

    // Deadline floor
    assert!(deadline >= now + TIMER_GRANULARITY);
}

#[test]
fn online_transition_fires_exactly_once() {
    let (host, node, _root) = node_with_upstream();

    let mut deadline = 0u64;
    let first = PING_CHECK_INTERVAL + 1000;
    node.process_background_tasks(token(), first, &mut deadline);
    assert_eq!(host.event_count(&Event::Online), 1);

    // Still online at the next tick: no duplicate event
    let second = first + PING_CHECK_INTERVAL;
    node.process_background_tasks(token(), second, &mut deadline);
    assert_eq!(host.event_count(&Event::Online), 1);
    assert_eq!(host.event_count(&Event::Offline), 0);

    // Far in the future the upstream has gone silent: exactly one Offline
    let much_later = second + 10 * PING_CHECK_INTERVAL;
    node.process_background_tasks(token(), much_later, &mut deadline);
    node.process_background_tasks(token(), much_later + PING_CHECK_INTERVAL, &mut deadline);
    assert_eq!(host.event_count(&Event::Offline), 1);
}

#[test]
fn ping_branch_respects_its_interval() {
    let (host, node, _root) = node_with_upstream();

    let mut deadline = 0u64;
    let now = PING_CHECK_INTERVAL + 1000;
    node.process_background_tasks(token(), now, &mut deadline);
    let sent_after_first = host.sent.lock().len();
    assert!(sent_after_first > 0);

    // Immediately re-ticking skips the ping branch entirely
    node.process_background_tasks(token(), now + 1, &mut deadline);
    assert_eq!(host.sent.lock().len(), sent_after_first);
    assert!(deadline >= now + 1 + TIMER_GRANULARITY);
}

#[test]
fn unresolved_upstreams_are_submitted_to_whois() {
    let host = MockHost::new();
    let node = Node::new(host, token(), 1000).unwrap();

    // A moon seed with no peer record and no endpoints can only be WHOISed
    node.orbit(token(), 0x77, 0x42_4242_4242);

    let mut deadline = 0u64;
    node.process_background_tasks(token(), PING_CHECK_INTERVAL + 1000, &mut deadline);

    // No upstream path exists yet, so the request stays queued for retry
    assert!(node.pending_whois_count() > 0);
}
