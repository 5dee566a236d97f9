//! A node runs the AODV engine on a single dispatcher thread. Everything else (listeners,
//! the stdin command loop, the layer above) talks to it by posting events to its mailbox.
pub mod commands;
pub mod listener;
pub mod node_config;
pub mod transport;

use self::commands::Commands;
use self::transport::Transport;
use crate::aodv::route_table::RouteEntry;
use crate::aodv::{Config, RouteStatus, Transmission, TxTarget, AODV};
use crate::logging::{self, MessageStatus};
use crate::{AodvError, AodvErrorKind, ONE_SECOND_MS};

use chrono::{DateTime, Utc};
use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender, TrySendError};
use rand::rngs::StdRng;
use slog::Logger;
use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;

/// Events processed by the dispatcher, one at a time.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A datagram arrived from a neighbour
    PacketArrived {
        source: Ipv6Addr,
        data: Vec<u8>,
        ts: DateTime<Utc>,
    },
    /// A command from the layer above
    CommandRequested(Commands),
    /// The engine has a staged command ready to be sent
    CommandPending,
    /// The rate-limiter deadline has passed
    TimerFired,
}

/// The dispatcher. Owns the engine and the transport.
#[derive(Debug)]
pub struct Node {
    engine: AODV,
    transport: Box<dyn Transport>,
    events: Receiver<NodeEvent>,
    events_tx: Sender<NodeEvent>,
    tx_queue: Receiver<Transmission>,
    //A staged command could not be signalled because the mailbox was full
    poll_missed: bool,
    logger: Logger,
}

impl Node {
    /// Creates a node with address `me`. The returned handle is the only way to talk to it.
    pub fn new(
        me: Ipv6Addr,
        config: Config,
        rng: &mut StdRng,
        transport: Box<dyn Transport>,
        logger: Logger,
    ) -> Result<(Node, NodeHandle), AodvError> {
        let (events_tx, events) = bounded(std::cmp::max(config.event_queue_size, 1));
        let (tx_sender, tx_queue) = unbounded();
        let engine = AODV::new(me, config, rng, tx_sender, logger.clone())?;
        let handle = NodeHandle::new(events_tx.clone());
        info!(logger, "Node initialized"; "address" => %me, "port" => config.port);

        let node = Node {
            engine,
            transport,
            events,
            events_tx,
            tx_queue,
            poll_missed: false,
            logger,
        };
        Ok((node, handle))
    }

    pub fn engine(&self) -> &AODV {
        &self.engine
    }

    /// A new handle to this node's mailbox.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.events_tx.clone())
    }

    /// Main loop of the node. Returns after processing `Commands::Finish`.
    pub fn run(mut self) -> Result<(), AodvError> {
        info!(self.logger, "Node started");
        loop {
            let timer = self.next_timer();
            let ev = select! {
                recv(self.events) -> ev => ev.map_err(|e| {
                    let err_msg = String::from("Node mailbox closed");
                    AodvError {
                        kind: AodvErrorKind::Contention(err_msg),
                        cause: Some(Box::new(e)),
                    }
                })?,
                recv(timer) -> _ => NodeEvent::TimerFired,
            };

            if !self.process_event(ev, Utc::now()) {
                break;
            }
        }
        info!(self.logger, "Node finished");
        Ok(())
    }

    /// Processes a single event. Returns false when the node should stop.
    pub fn process_event(&mut self, ev: NodeEvent, now: DateTime<Utc>) -> bool {
        match ev {
            NodeEvent::PacketArrived { source, data, ts } => {
                match self.engine.handle_packet(source, &data, ts) {
                    Ok(_) => { /* All good! */ }
                    Err(ref e) if e.is_malformed() => {
                        warn!(
                            self.logger,
                            "Discarding datagram";
                            "source" => %source,
                            "size" => data.len(),
                            "reason" => %e,
                            "status" => MessageStatus::DROPPED,
                        );
                    }
                    Err(e) => self.log_error("Error handling message", e),
                }
            }
            NodeEvent::CommandRequested(cmd) => return self.process_command(cmd, now),
            NodeEvent::CommandPending => self.run_pending_command(now),
            NodeEvent::TimerFired => {
                self.poll_missed = false;
                if self.engine.on_timer(now) {
                    self.run_pending_command(now);
                }
            }
        }
        self.flush_transmissions();
        true
    }

    fn process_command(&mut self, cmd: Commands, now: DateTime<Utc>) -> bool {
        match cmd {
            Commands::RequestRoute { destination, reply } => {
                let status = self.engine.request_route_to(destination, now);
                if status == RouteStatus::Discovering {
                    self.signal_pending_command();
                }
                if let Some(reply) = reply {
                    //The caller may have given up waiting
                    let _ = reply.try_send(status);
                }
            }
            Commands::ReportUnreachable { destination, reply } => {
                let staged = self.engine.report_unreachable(destination);
                if staged {
                    self.signal_pending_command();
                }
                if let Some(reply) = reply {
                    let _ = reply.try_send(staged);
                }
            }
            Commands::Finish => {
                info!(self.logger, "Shutting down");
                self.engine.shutdown();
                //Anything not yet transmitted is dropped
                while self.tx_queue.try_recv().is_ok() {}
                return false;
            }
        }
        self.flush_transmissions();
        true
    }

    fn signal_pending_command(&mut self) {
        if let Err(TrySendError::Full(_)) = self.events_tx.try_send(NodeEvent::CommandPending) {
            warn!(self.logger, "Mailbox is full. Command will be sent on the next timer");
            self.poll_missed = true;
        }
    }

    fn run_pending_command(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.engine.run_pending_command(now) {
            self.log_error("Failed to run pending command", e);
        }
    }

    fn next_timer(&self) -> Receiver<std::time::Instant> {
        if self.poll_missed {
            return after(Duration::from_millis(0));
        }
        match self.engine.rate_limit_deadline() {
            Some(deadline) => {
                let wait = (deadline - Utc::now())
                    .to_std()
                    .unwrap_or_else(|_| Duration::from_millis(0));
                after(wait)
            }
            None => never(),
        }
    }

    /// Hands every queued message to the transport.
    fn flush_transmissions(&mut self) {
        while let Ok(tx) = self.tx_queue.try_recv() {
            let res = match tx.target {
                TxTarget::Multicast { ttl } => self.transport.send_multicast(&tx.payload, ttl),
                TxTarget::Unicast(next_hop) => self.transport.send_unicast(next_hop, &tx.payload),
            };
            match res {
                Ok(_) => logging::log_tx(&self.logger, &tx, MessageStatus::SENT, None),
                Err(e) => {
                    let reason = e.to_string();
                    logging::log_tx(&self.logger, &tx, MessageStatus::FAILED, Some(&reason));
                    self.log_error("Transport unavailable", e);
                }
            }
        }
    }

    fn log_error(&self, msg: &str, mut e: AodvError) {
        let cause = e.cause.take().map(|x| format!("{}", x));
        error!(
            self.logger,
            "{}: {}", msg, e;
            "Cause" => cause,
        );
    }
}

/// Cloneable handle used to talk to a running node.
/// Blocking calls must not be made from the dispatcher thread itself.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    events: Sender<NodeEvent>,
}

impl NodeHandle {
    pub fn new(events: Sender<NodeEvent>) -> Self {
        NodeHandle { events }
    }

    /// Asks the node for a route to `destination` and waits for the answer.
    pub fn request_route_status(&self, destination: Ipv6Addr) -> Result<RouteStatus, AodvError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.post(NodeEvent::CommandRequested(Commands::RequestRoute {
            destination,
            reply: Some(reply_tx),
        }))?;
        reply_rx
            .recv_timeout(Duration::from_millis(ONE_SECOND_MS as u64))
            .map_err(|e| {
                let err_msg = String::from("Node did not answer the route request");
                AodvError {
                    kind: AodvErrorKind::Contention(err_msg),
                    cause: Some(Box::new(e)),
                }
            })
    }

    /// Returns a fresh route to `destination`, or None when none is known yet.
    /// In that case discovery may have started and the call should be retried later.
    pub fn request_route_to(&self, destination: Ipv6Addr) -> Option<RouteEntry> {
        self.request_route_status(destination)
            .ok()
            .and_then(RouteStatus::into_route)
    }

    /// Tells the node that `destination` could not be reached and waits until the RERR is staged.
    /// Fails while another command is staged. The route is marked broken in either case.
    pub fn report_unreachable(&self, destination: Ipv6Addr) -> Result<(), AodvError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.post(NodeEvent::CommandRequested(Commands::ReportUnreachable {
            destination,
            reply: Some(reply_tx),
        }))?;
        let staged = reply_rx
            .recv_timeout(Duration::from_millis(ONE_SECOND_MS as u64))
            .map_err(|e| {
                let err_msg = String::from("Node did not answer the unreachable report");
                AodvError {
                    kind: AodvErrorKind::Contention(err_msg),
                    cause: Some(Box::new(e)),
                }
            })?;
        if !staged {
            let err_msg = String::from("A command is already pending. Retry later");
            return Err(AodvError::new(AodvErrorKind::Contention(err_msg)));
        }
        Ok(())
    }

    /// Any other command, such as one read from stdin.
    pub fn send_command(&self, cmd: Commands) -> Result<(), AodvError> {
        self.post(NodeEvent::CommandRequested(cmd))
    }

    /// Receive callback for transports and listeners. Returns false if the datagram was
    /// dropped because the mailbox is full, and an error once the node has stopped.
    pub fn on_receive(&self, source: Ipv6Addr, data: &[u8]) -> Result<bool, AodvError> {
        let ev = NodeEvent::PacketArrived {
            source,
            data: data.to_vec(),
            ts: Utc::now(),
        };
        match self.events.try_send(ev) {
            Ok(_) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                let err_msg = String::from("Node has stopped");
                Err(AodvError::new(AodvErrorKind::Contention(err_msg)))
            }
        }
    }

    /// Stops the node. Waits for room in the mailbox.
    pub fn shutdown(&self) -> Result<(), AodvError> {
        self.events
            .send(NodeEvent::CommandRequested(Commands::Finish))
            .map_err(|e| {
                let err_msg = String::from("Node has stopped");
                AodvError {
                    kind: AodvErrorKind::Contention(err_msg),
                    cause: Some(Box::new(e)),
                }
            })
    }

    fn post(&self, ev: NodeEvent) -> Result<(), AodvError> {
        self.events.try_send(ev).map_err(|e| {
            let err_msg = match e {
                TrySendError::Full(_) => String::from("Node mailbox is full"),
                TrySendError::Disconnected(_) => String::from("Node has stopped"),
            };
            AodvError::new(AodvErrorKind::Contention(err_msg))
        })
    }
}

/// Reads commands from stdin and posts them to the node until `FINISH` is read or stdin closes.
pub fn command_loop(logger: &Logger, handle: NodeHandle) {
    let mut input = String::new();
    let stdin = io::stdin();

    info!(logger, "Command loop started");
    loop {
        input.clear();
        match stdin.read_line(&mut input) {
            Ok(0) => {
                info!(logger, "stdin closed");
                break;
            }
            Ok(_bytes) => {
                if input.trim().is_empty() {
                    continue;
                }
                match input.parse::<Commands>() {
                    Ok(Commands::Finish) => {
                        if let Err(e) = handle.shutdown() {
                            error!(logger, "Error executing command: {}", &e);
                        }
                        break;
                    }
                    Ok(command) => {
                        if let Err(e) = handle.send_command(command) {
                            error!(logger, "Error executing command: {}", &e);
                        }
                    }
                    Err(e) => {
                        error!(logger, "Error parsing command: {}", e);
                    }
                }
            }
            Err(e) => {
                error!(logger, "{}", &e);
                break;
            }
        }
    }
}
