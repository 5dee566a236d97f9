//! This module contains the Listener trait and its UDP implementation. The trait hides the socket used to
//! receive datagrams so the node does not know whether it is attached to a real or an in-process network.
use crate::node::transport::{new_socket, MULTICAST_GROUP};
use crate::node::NodeHandle;
use crate::{AodvError, AodvErrorKind};
use slog::Logger;
use socket2::{SockAddr, Socket};
use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest datagram the listener will read.
pub const MAX_UDP_PAYLOAD_SIZE: usize = 65_507;

/// Main trait of this module. Abstracts its underlying socket.
pub trait Listener: Send + std::fmt::Debug {
    /// Reads a datagram (if possible) from the underlying socket, along with the address it came from.
    fn read_packet(&self) -> Option<(Ipv6Addr, Vec<u8>)>;
    /// Get the address at which this listener receives datagrams
    fn get_address(&self) -> String;
}

/// Listener bound to the AODV port that has joined the all-nodes group on one interface.
#[derive(Debug)]
pub struct UdpListener {
    socket: Socket,
    logger: Logger,
}

impl UdpListener {
    ///Creates a new instance of UdpListener. Reads time out after `read_timeout` milliseconds.
    pub fn new(
        interface_index: u32,
        port: u16,
        read_timeout: u64,
        logger: Logger,
    ) -> Result<UdpListener, AodvError> {
        let socket = new_socket()?;
        let setup = |r: io::Result<()>, what: &str| {
            r.map_err(|e| {
                let err_msg = format!("Failed to {}", what);
                AodvError {
                    kind: AodvErrorKind::Networking(err_msg),
                    cause: Some(Box::new(e)),
                }
            })
        };

        setup(socket.set_only_v6(true), "restrict socket to IPv6")?;
        setup(socket.set_reuse_address(true), "set SO_REUSEADDR")?;
        setup(
            socket.join_multicast_v6(&MULTICAST_GROUP, interface_index),
            "join the all-nodes multicast group",
        )?;
        setup(
            socket.set_read_timeout(Some(Duration::from_millis(read_timeout))),
            "set read timeout",
        )?;
        let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
        setup(socket.bind(&SockAddr::from(addr)), "bind the AODV port")?;

        info!(logger, "Listening"; "port" => port, "interface_index" => interface_index);
        Ok(UdpListener { socket, logger })
    }
}

//No datagram arrived before the read timeout
fn is_read_timeout(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Listener for UdpListener {
    fn read_packet(&self) -> Option<(Ipv6Addr, Vec<u8>)> {
        let mut buffer = vec![0; MAX_UDP_PAYLOAD_SIZE + 1];

        match self.socket.recv_from(&mut buffer) {
            Ok((bytes_read, peer_addr)) => {
                if bytes_read == 0 {
                    return None;
                }
                match peer_addr.as_inet6() {
                    Some(peer) => Some((*peer.ip(), buffer[..bytes_read].to_vec())),
                    None => {
                        warn!(self.logger, "Ignoring datagram from non-IPv6 peer");
                        None
                    }
                }
            }
            Err(ref e) if is_read_timeout(e.kind()) => None,
            Err(e) => {
                warn!(self.logger, "Failed to read from socket: {}", e);
                None
            }
        }
    }

    fn get_address(&self) -> String {
        match self.socket.local_addr().ok().and_then(|a| a.as_inet6()) {
            Some(addr) => addr.to_string(),
            None => String::from("unbound"),
        }
    }
}

/// Pumps datagrams from `listener` into the node. The thread exits on the first datagram
/// received after the node has stopped.
pub fn spawn_listener<L: Listener + 'static>(
    listener: L,
    handle: NodeHandle,
    logger: Logger,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(String::from("Listener"))
        .spawn(move || {
            info!(logger, "Listener started"; "address" => listener.get_address());
            loop {
                let (source, data) = match listener.read_packet() {
                    Some(p) => p,
                    None => continue,
                };
                match handle.on_receive(source, &data) {
                    Ok(true) => { /* Delivered */ }
                    Ok(false) => {
                        warn!(logger, "Node mailbox is full. Datagram dropped"; "source" => %source);
                    }
                    Err(_) => break,
                }
            }
            info!(logger, "Listener finished");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use crate::node::NodeEvent;
    use crossbeam_channel::bounded;

    #[derive(Debug)]
    struct MockListener {
        source: Ipv6Addr,
    }

    impl Listener for MockListener {
        fn read_packet(&self) -> Option<(Ipv6Addr, Vec<u8>)> {
            thread::sleep(Duration::from_millis(5));
            Some((self.source, vec![3, 0, 0, 1]))
        }

        fn get_address(&self) -> String {
            String::from("mock")
        }
    }

    #[test]
    fn test_only_timeouts_are_silent() {
        assert!(is_read_timeout(io::ErrorKind::WouldBlock));
        assert!(is_read_timeout(io::ErrorKind::TimedOut));
        assert!(!is_read_timeout(io::ErrorKind::ConnectionRefused));
        assert!(!is_read_timeout(io::ErrorKind::Interrupted));
    }

    #[test]
    fn test_listener_feeds_node_until_it_stops() {
        let source: Ipv6Addr = "fe80::9".parse().unwrap();
        let (tx, rx) = bounded(2);
        let handle = NodeHandle::new(tx);
        let logger = logging::create_discard_logger();
        let t = spawn_listener(MockListener { source }, handle, logger).unwrap();

        match rx.recv().unwrap() {
            NodeEvent::PacketArrived { source: s, data, .. } => {
                assert_eq!(s, source);
                assert_eq!(data, vec![3, 0, 0, 1]);
            }
            e => panic!("Unexpected event {:?}", e),
        }
        drop(rx);
        assert!(t.join().is_ok());
    }
}
