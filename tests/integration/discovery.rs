//! End-to-end scenarios with several nodes running on their own threads over the simulated medium.
use super::super::*;
use aodv_mesh::aodv::route_table::RouteEntry;
use aodv_mesh::aodv::{Config, RouteStatus};
use aodv_mesh::node::transport::SimulatedMedium;
use aodv_mesh::node::{Node, NodeHandle};
use aodv_mesh::AodvError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_LIMIT_MS: u64 = 3_000;
const POLL_MS: u64 = 20;

struct Network {
    medium: SimulatedMedium,
    handles: Vec<NodeHandle>,
    threads: Vec<JoinHandle<Result<(), AodvError>>>,
}

impl Network {
    /// Starts `n` nodes, node_addr(1)..node_addr(n), linked in a line.
    fn line(n: u16) -> Network {
        let medium = SimulatedMedium::new();
        let mut handles = Vec::new();
        let mut threads = Vec::new();

        for i in 1..=n {
            let me = node_addr(i);
            let mut rng = StdRng::seed_from_u64(u64::from(i));
            let transport = Box::new(medium.transport(me));
            let (node, handle) =
                Node::new(me, Config::default(), &mut rng, transport, test_logger()).unwrap();
            medium.register(me, handle.clone()).unwrap();
            handles.push(handle);
            threads.push(thread::spawn(move || node.run()));
        }
        for i in 1..n {
            medium.link(node_addr(i), node_addr(i + 1)).unwrap();
        }

        Network {
            medium,
            handles,
            threads,
        }
    }

    fn node(&self, n: u16) -> &NodeHandle {
        &self.handles[usize::from(n - 1)]
    }

    fn shutdown(self) {
        for h in &self.handles {
            h.shutdown().unwrap();
        }
        for t in self.threads {
            assert!(t.join().unwrap().is_ok());
        }
    }
}

/// Keeps asking `from` for a route to `dest` until one shows up.
fn wait_for_route(from: &NodeHandle, dest: Ipv6Addr) -> Option<RouteEntry> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(WAIT_LIMIT_MS) {
        if let Some(route) = from.request_route_to(dest) {
            return Some(route);
        }
        thread::sleep(Duration::from_millis(POLL_MS));
    }
    None
}

/// Waits until `from` no longer has a fresh route to `dest`.
fn wait_for_no_route(from: &NodeHandle, dest: Ipv6Addr) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(WAIT_LIMIT_MS) {
        match from.request_route_status(dest) {
            Ok(RouteStatus::Available(_)) => thread::sleep(Duration::from_millis(POLL_MS)),
            Ok(_) => return true,
            Err(_) => return false,
        }
    }
    false
}

#[test]
fn three_node_discovery() {
    let net = Network::line(3);
    let (a, b, c) = (node_addr(1), node_addr(2), node_addr(3));

    let route = wait_for_route(net.node(1), c).expect("A never learned a route to C");
    assert_eq!(route.destination, c);
    assert_eq!(route.next_hop, b);
    assert_eq!(route.hop_count, 2);
    assert!(route.has_valid_seqno());

    //The relay learned both ends on the way
    let to_c = net.node(2).request_route_to(c).unwrap();
    assert_eq!(to_c.next_hop, c);
    assert_eq!(to_c.hop_count, 1);
    let to_a = net.node(2).request_route_to(a).unwrap();
    assert_eq!(to_a.next_hop, a);

    //And the destination has the reverse route back to A
    let back = net.node(3).request_route_to(a).unwrap();
    assert_eq!(back.next_hop, b);
    assert_eq!(back.hop_count, 2);

    net.shutdown();
}

#[test]
fn route_error_invalidates_upstream_routes() {
    let net = Network::line(3);
    let (b, c) = (node_addr(2), node_addr(3));

    assert!(wait_for_route(net.node(1), c).is_some());
    assert!(net.node(2).request_route_to(c).is_some());

    //C goes away. B notices and reports it.
    net.medium.unlink(b, c).unwrap();
    net.node(2).report_unreachable(c).unwrap();

    assert!(wait_for_no_route(net.node(2), c));
    assert!(wait_for_no_route(net.node(1), c));

    net.shutdown();
}

#[test]
fn unreachable_destination_is_never_found() {
    let net = Network::line(2);
    let nowhere = node_addr(9);

    //Repeated requests are either rate limited or start a new discovery
    for _ in 0..3 {
        match net.node(1).request_route_status(nowhere).unwrap() {
            RouteStatus::Available(r) => panic!("Unexpected route {:?}", r),
            _ => thread::sleep(Duration::from_millis(POLL_MS)),
        }
    }
    assert!(net.node(1).request_route_to(nowhere).is_none());

    net.shutdown();
}
