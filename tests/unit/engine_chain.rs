//! Several engines wired together by hand, without threads. Every transmission is delivered
//! synchronously so the outcome of a discovery is deterministic.
use super::super::*;
use aodv_mesh::aodv::messages::{deserialize_message, Messages};
use aodv_mesh::aodv::{Config, RouteStatus, Transmission, TxTarget, AODV};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{unbounded, Receiver};
use rand::rngs::StdRng;
use rand::SeedableRng;

struct Chain {
    engines: Vec<AODV>,
    queues: Vec<Receiver<Transmission>>,
    delivered: Vec<Messages>,
}

impl Chain {
    /// `n` engines in a line: 1 - 2 - ... - n
    fn new(n: u16, config: Config) -> Chain {
        let mut engines = Vec::new();
        let mut queues = Vec::new();
        for i in 1..=n {
            let (tx, rx) = unbounded();
            let mut rng = StdRng::seed_from_u64(u64::from(i));
            engines.push(AODV::new(node_addr(i), config, &mut rng, tx, test_logger()).unwrap());
            queues.push(rx);
        }
        Chain {
            engines,
            queues,
            delivered: Vec::new(),
        }
    }

    fn engine(&mut self, n: u16) -> &mut AODV {
        &mut self.engines[usize::from(n - 1)]
    }

    fn neighbours(&self, i: usize) -> Vec<usize> {
        let mut v = Vec::new();
        if i > 0 {
            v.push(i - 1);
        }
        if i + 1 < self.engines.len() {
            v.push(i + 1);
        }
        v
    }

    /// Delivers queued transmissions until the network is quiet.
    fn pump(&mut self, now: DateTime<Utc>) {
        loop {
            let mut batch = Vec::new();
            for (i, q) in self.queues.iter().enumerate() {
                while let Ok(tx) = q.try_recv() {
                    batch.push((i, tx));
                }
            }
            if batch.is_empty() {
                return;
            }

            for (i, tx) in batch {
                let source = self.engines[i].me();
                self.delivered.push(deserialize_message(&tx.payload).unwrap());
                let targets: Vec<usize> = match tx.target {
                    TxTarget::Multicast { ttl } if ttl > 0 => self.neighbours(i),
                    TxTarget::Multicast { .. } => vec![],
                    TxTarget::Unicast(next_hop) => self
                        .neighbours(i)
                        .into_iter()
                        .filter(|j| self.engines[*j].me() == next_hop)
                        .collect(),
                };
                for j in targets {
                    self.engines[j].handle_packet(source, &tx.payload, now).unwrap();
                }
            }
        }
    }
}

#[test]
fn four_node_line_discovery() {
    let now = Utc::now();
    let mut chain = Chain::new(4, Config::default());

    assert_eq!(chain.engine(1).request_route_to(node_addr(4), now), RouteStatus::Discovering);
    chain.engine(1).run_pending_command(now).unwrap();
    chain.pump(now);

    let route = chain.engine(1).lookup(&node_addr(4), now).unwrap();
    assert_eq!(route.next_hop, node_addr(2));
    assert_eq!(route.hop_count, 3);

    let back = chain.engine(4).lookup(&node_addr(1), now).unwrap();
    assert_eq!(back.next_hop, node_addr(3));
    assert_eq!(back.hop_count, 3);

    //Every relay kept a route to both ends
    for n in 2..=3 {
        assert!(chain.engine(n).lookup(&node_addr(1), now).is_some());
        assert!(chain.engine(n).lookup(&node_addr(4), now).is_some());
    }

    let rreps = chain
        .delivered
        .iter()
        .filter(|m| matches!(m, Messages::RREP(_)))
        .count();
    //D → C → B → A
    assert_eq!(rreps, 3);

    //Route is now served from the cache
    match chain.engine(1).request_route_to(node_addr(4), now) {
        RouteStatus::Available(r) => assert_eq!(r.hop_count, 3),
        s => panic!("Unexpected status {:?}", s),
    }
}

#[test]
fn discovery_limited_by_network_diameter() {
    let now = Utc::now();
    let config = Config {
        net_diameter: 2,
        ..Default::default()
    };
    let mut chain = Chain::new(4, config);

    chain.engine(1).request_route_to(node_addr(4), now);
    chain.engine(1).run_pending_command(now).unwrap();
    chain.pump(now);

    assert!(chain.engine(1).lookup(&node_addr(4), now).is_none());
    assert!(chain.engine(4).lookup(&node_addr(1), now).is_none());
    //Node 3 still learned the reverse route before dropping the request
    assert!(chain.engine(3).lookup(&node_addr(1), now).is_some());
}

#[test]
fn route_error_reaches_neighbours_only() {
    let now = Utc::now();
    let mut chain = Chain::new(4, Config::default());
    chain.engine(1).request_route_to(node_addr(4), now);
    chain.engine(1).run_pending_command(now).unwrap();
    chain.pump(now);
    assert!(chain.engine(1).lookup(&node_addr(4), now).is_some());

    //Node 2 reports the loss
    assert!(chain.engine(2).report_unreachable(node_addr(4)));
    chain.engine(2).run_pending_command(now).unwrap();
    chain.pump(now);

    assert!(chain.engine(2).lookup(&node_addr(4), now).is_none());
    assert!(chain.engine(1).lookup(&node_addr(4), now).is_none());
    assert!(chain.engine(3).lookup(&node_addr(4), now).is_none());
    //RERRs travel a single hop. Node 4 never hears about itself.
    let rerrs = chain
        .delivered
        .iter()
        .filter(|m| matches!(m, Messages::RERR(_)))
        .count();
    assert_eq!(rerrs, 1);
}

#[test]
fn routes_expire_without_traffic() {
    let now = Utc::now();
    let mut chain = Chain::new(3, Config::default());
    chain.engine(1).request_route_to(node_addr(3), now);
    chain.engine(1).run_pending_command(now).unwrap();
    chain.pump(now);
    assert!(chain.engine(1).lookup(&node_addr(3), now).is_some());

    let later = now + Duration::milliseconds(i64::from(Config::default().route_timeout) + 1);
    assert!(chain.engine(1).lookup(&node_addr(3), later).is_none());
    //Still known, so the next request carries its sequence number
    assert!(chain.engine(1).routes().lookup_any(&node_addr(3)).is_some());
}
