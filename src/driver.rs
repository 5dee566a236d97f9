//! Routing driver shim. Exposes a node through the capability interface a host network stack
//! expects from a routing protocol. AODV has no root and no leaf nodes, so most capabilities
//! have fixed answers.
use crate::aodv::route_table::RouteEntry;
use crate::aodv::RouteStatus;
use crate::node::{Node, NodeHandle};
use crate::{AodvError, AodvErrorKind};
use slog::Logger;
use std::net::Ipv6Addr;
use std::thread::{self, JoinHandle};

/// Capabilities of a routing protocol as seen by the network stack.
pub trait RoutingDriver {
    /// Name of the protocol
    fn name(&self) -> &'static str;
    /// Starts the protocol
    fn init(&mut self) -> Result<(), AodvError>;
    /// Makes this node the root of the network
    fn root_start(&mut self) -> Result<(), AodvError>;
    fn node_is_root(&self) -> bool;
    fn get_root_ipaddr(&self) -> Option<Ipv6Addr>;
    fn leave_network(&mut self);
    fn node_has_joined(&self) -> bool;
    fn node_is_reachable(&self) -> bool;
    fn is_in_leaf_mode(&self) -> bool;
    /// A fresh route to `dest`, if one is known. Otherwise discovery is started when allowed.
    fn request_route_to(&self, dest: Ipv6Addr) -> Option<RouteEntry>;
    /// The layer above failed to reach `dest`. Fails with a Contention error while another
    /// command is staged. The caller may retry.
    fn report_unreachable(&self, dest: Ipv6Addr) -> Result<(), AodvError>;
    /// Stops the protocol
    fn shutdown(&mut self) -> Result<(), AodvError>;
}

/// Driver running a node on its own dispatcher thread.
#[derive(Debug)]
pub struct AodvDriver {
    node: Option<Node>,
    handle: NodeHandle,
    dispatcher: Option<JoinHandle<Result<(), AodvError>>>,
    logger: Logger,
}

impl AodvDriver {
    pub fn new(node: Node, logger: Logger) -> Self {
        let handle = node.handle();
        AodvDriver {
            node: Some(node),
            handle,
            dispatcher: None,
            logger,
        }
    }

    pub fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    /// Same as `request_route_to`, with the reason when no route is returned.
    pub fn request_route_status(&self, dest: Ipv6Addr) -> Result<RouteStatus, AodvError> {
        self.handle.request_route_status(dest)
    }
}

impl RoutingDriver for AodvDriver {
    fn name(&self) -> &'static str {
        "AODV"
    }

    fn init(&mut self) -> Result<(), AodvError> {
        let node = match self.node.take() {
            Some(n) => n,
            None => {
                debug!(self.logger, "Routing driver already initialized");
                return Ok(());
            }
        };

        info!(self.logger, "Initializing AODV routing driver");
        let dispatcher = thread::Builder::new()
            .name(String::from("Dispatcher"))
            .spawn(move || node.run())
            .map_err(|e| {
                let err_msg = String::from("Failed to start the dispatcher thread");
                AodvError {
                    kind: AodvErrorKind::Contention(err_msg),
                    cause: Some(Box::new(e)),
                }
            })?;
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn root_start(&mut self) -> Result<(), AodvError> {
        let err_msg = String::from("AODV has no root nodes");
        Err(AodvError::new(AodvErrorKind::Configuration(err_msg)))
    }

    fn node_is_root(&self) -> bool {
        false
    }

    fn get_root_ipaddr(&self) -> Option<Ipv6Addr> {
        None
    }

    fn leave_network(&mut self) {
        //Can't leave
    }

    fn node_has_joined(&self) -> bool {
        true
    }

    fn node_is_reachable(&self) -> bool {
        true
    }

    fn is_in_leaf_mode(&self) -> bool {
        false
    }

    fn request_route_to(&self, dest: Ipv6Addr) -> Option<RouteEntry> {
        self.handle.request_route_to(dest)
    }

    fn report_unreachable(&self, dest: Ipv6Addr) -> Result<(), AodvError> {
        self.handle.report_unreachable(dest)
    }

    fn shutdown(&mut self) -> Result<(), AodvError> {
        let dispatcher = match self.dispatcher.take() {
            Some(d) => d,
            None => {
                //Never started
                self.node = None;
                return Ok(());
            }
        };
        self.handle.shutdown()?;
        match dispatcher.join() {
            Ok(res) => res,
            Err(_) => {
                let err_msg = String::from("Dispatcher thread panicked");
                Err(AodvError::new(AodvErrorKind::Contention(err_msg)))
            }
        }
    }
}
