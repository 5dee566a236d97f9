//! Transports that carry AODV datagrams between nodes. The engine never touches them directly:
//! the node hands them the encoded messages queued by the engine.
use crate::node::NodeHandle;
use crate::{AodvError, AodvErrorKind};
use pnet_datalink as datalink;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv6Addr, SocketAddrV6};
use std::sync::{Arc, Mutex};

lazy_static! {
    /// All-nodes link-local multicast group. RREQs and RERRs are flooded here.
    pub static ref MULTICAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
}

/// Sending half of the network as seen by a node.
pub trait Transport: std::fmt::Debug + Send {
    /// Sends `data` to every neighbour, with the given hop limit.
    fn send_multicast(&self, data: &[u8], ttl: u32) -> Result<(), AodvError>;
    /// Sends `data` to a single neighbour.
    fn send_unicast(&self, next_hop: Ipv6Addr, data: &[u8]) -> Result<(), AodvError>;
}

//************************************************//
//****************** UDP/IPv6 ********************//
//************************************************//
/// Transport over a UDP socket bound to a network interface.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Socket,
    interface_index: u32,
    port: u16,
}

impl UdpTransport {
    /// Creates a transport that sends through the interface with index `interface_index`.
    pub fn new(interface_index: u32, port: u16) -> Result<UdpTransport, AodvError> {
        let socket = new_socket()?;
        socket
            .set_multicast_if_v6(interface_index)
            .map_err(|e| {
                let err_msg = format!(
                    "Failed to configure interface with index {}",
                    interface_index
                );
                AodvError {
                    kind: AodvErrorKind::Networking(err_msg),
                    cause: Some(Box::new(e)),
                }
            })?;
        socket.set_multicast_loop_v6(false).map_err(|e| {
            let err_msg = String::from("Failed to configure socket");
            AodvError {
                kind: AodvErrorKind::Networking(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;

        Ok(UdpTransport {
            socket,
            interface_index,
            port,
        })
    }

    fn send_to(&self, addr: SocketAddrV6, data: &[u8]) -> Result<(), AodvError> {
        self.socket
            .send_to(data, &SockAddr::from(addr))
            .map(|_| ())
            .map_err(|e| {
                let err_msg = format!("Failed to send datagram to {}", addr);
                AodvError {
                    kind: AodvErrorKind::TransportUnavailable(err_msg),
                    cause: Some(Box::new(e)),
                }
            })
    }
}

impl Transport for UdpTransport {
    fn send_multicast(&self, data: &[u8], ttl: u32) -> Result<(), AodvError> {
        self.socket.set_multicast_hops_v6(ttl).map_err(|e| {
            let err_msg = format!("Failed to set multicast hop limit to {}", ttl);
            AodvError {
                kind: AodvErrorKind::TransportUnavailable(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        let addr = SocketAddrV6::new(*MULTICAST_GROUP, self.port, 0, self.interface_index);
        self.send_to(addr, data)
    }

    fn send_unicast(&self, next_hop: Ipv6Addr, data: &[u8]) -> Result<(), AodvError> {
        //Link-local addresses are only meaningful together with the interface
        let scope_id = if is_link_local(&next_hop) {
            self.interface_index
        } else {
            0
        };
        let addr = SocketAddrV6::new(next_hop, self.port, 0, scope_id);
        self.send_to(addr, data)
    }
}

/// Creates an IPv6 UDP socket.
pub fn new_socket() -> Result<Socket, AodvError> {
    Socket::new(Domain::ipv6(), Type::dgram(), Some(Protocol::udp())).map_err(|e| {
        let err_msg = String::from("Failed to create new socket");
        AodvError {
            kind: AodvErrorKind::Networking(err_msg),
            cause: Some(Box::new(e)),
        }
    })
}

/// Returns the index and IPv6 address of the named interface. Link-local addresses are preferred.
pub fn resolve_interface(name: &str) -> Result<(u32, Ipv6Addr), AodvError> {
    for iface in datalink::interfaces() {
        if iface.name != name {
            continue;
        }
        let addresses: Vec<Ipv6Addr> = iface
            .ips
            .iter()
            .filter_map(|net| match net.ip() {
                IpAddr::V6(addr) => Some(addr),
                //Only using IPv6
                IpAddr::V4(_) => None,
            })
            .collect();
        let chosen = addresses
            .iter()
            .find(|a| is_link_local(a))
            .or_else(|| addresses.first());
        return match chosen {
            Some(addr) => Ok((iface.index, *addr)),
            None => {
                let err_msg = format!("Network interface {} has no IPv6 address.", name);
                Err(AodvError::new(AodvErrorKind::Configuration(err_msg)))
            }
        };
    }

    let err_msg = format!("Network interface {} not found.", name);
    Err(AodvError::new(AodvErrorKind::Configuration(err_msg)))
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

//************************************************//
//**************** Simulated medium **************//
//************************************************//
#[derive(Debug, Default)]
struct MediumState {
    nodes: HashMap<Ipv6Addr, NodeHandle>,
    links: HashSet<(Ipv6Addr, Ipv6Addr)>,
}

/// In-process network. Datagrams only travel over links added with `link`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SimulatedMedium {
    pub fn new() -> Self {
        Default::default()
    }

    /// Makes a node reachable through the medium.
    pub fn register(&self, addr: Ipv6Addr, handle: NodeHandle) -> Result<(), AodvError> {
        let mut state = self.lock()?;
        state.nodes.insert(addr, handle);
        Ok(())
    }

    /// Adds a bidirectional link between two nodes.
    pub fn link(&self, a: Ipv6Addr, b: Ipv6Addr) -> Result<(), AodvError> {
        let mut state = self.lock()?;
        state.links.insert((a, b));
        state.links.insert((b, a));
        Ok(())
    }

    /// Removes the link between two nodes, if any.
    pub fn unlink(&self, a: Ipv6Addr, b: Ipv6Addr) -> Result<(), AodvError> {
        let mut state = self.lock()?;
        state.links.remove(&(a, b));
        state.links.remove(&(b, a));
        Ok(())
    }

    /// Transport for the node with address `me`.
    pub fn transport(&self, me: Ipv6Addr) -> SimulatedTransport {
        SimulatedTransport {
            me,
            medium: self.clone(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MediumState>, AodvError> {
        self.state.lock().map_err(|_| {
            let err_msg = String::from("Simulated medium lock is poisoned");
            AodvError::new(AodvErrorKind::Contention(err_msg))
        })
    }
}

/// Transport of a single node attached to a `SimulatedMedium`.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    me: Ipv6Addr,
    medium: SimulatedMedium,
}

impl Transport for SimulatedTransport {
    fn send_multicast(&self, data: &[u8], ttl: u32) -> Result<(), AodvError> {
        if ttl == 0 {
            return Ok(());
        }
        let state = self.medium.lock()?;
        for (addr, handle) in state.nodes.iter() {
            if *addr != self.me && state.links.contains(&(self.me, *addr)) {
                //Lossy medium. A neighbour that went away or is busy misses the datagram.
                let _ = handle.on_receive(self.me, data);
            }
        }
        Ok(())
    }

    fn send_unicast(&self, next_hop: Ipv6Addr, data: &[u8]) -> Result<(), AodvError> {
        let state = self.medium.lock()?;
        let handle = match state.nodes.get(&next_hop) {
            Some(h) if state.links.contains(&(self.me, next_hop)) => h,
            _ => {
                let err_msg = format!("{} is not a neighbour of {}", next_hop, self.me);
                return Err(AodvError::new(AodvErrorKind::TransportUnavailable(err_msg)));
            }
        };
        handle.on_receive(self.me, data).map(|_| ())
    }
}
