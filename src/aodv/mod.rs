//! Control plane of the Ad-hoc On-Demand Distance Vector routing protocol, per its RFC https://www.rfc-editor.org/info/rfc3561
pub mod messages;
pub mod rate_limiter;
pub mod route_table;
pub mod rreq_cache;
pub mod seqno;

use self::messages::*;
use self::rate_limiter::RateLimiter;
use self::route_table::{RouteEntry, RouteTable};
use self::rreq_cache::DuplicateCache;
use self::seqno::SequenceAuthority;
use crate::logging::{self, MessageStatus};
use crate::{AodvError, AodvErrorKind};

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Sender;
use rand::{rngs::StdRng, Rng};
use slog::Logger;
use std::net::Ipv6Addr;
use std::num::NonZeroUsize;

// **************************************************
// ************ Configuration parameters ************
// **************************************************
/// Well-known AODV port
pub const AODV_UDP_PORT: u16 = 654;
const NET_DIAMETER: u8 = 20;
const ROUTE_TIMEOUT: u32 = 6000; //milliseconds
const RREQ_INTERVAL: u32 = 125; //milliseconds. Max 8 RREQs per second.
const ROUTE_CACHE_SIZE: usize = 32;
const FW_CACHE_SIZE: usize = 16;
const EVENT_QUEUE_SIZE: usize = 64;
const NEIGHBOUR_HOPS: u8 = 1;

/// Protocol parameters. Fixed once the node starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub port: u16,
    pub net_diameter: u8,
    /// Lifetime of a route, in milliseconds
    pub route_timeout: u32,
    /// Minimum time between route requests, in milliseconds
    pub rreq_interval: u32,
    pub route_cache_size: usize,
    pub fw_cache_size: usize,
    pub event_queue_size: usize,
}

impl Config {
    /// Checks the parameters an engine cannot run with.
    pub fn validate(&self) -> Result<(), AodvError> {
        let err_msg = if self.net_diameter == 0 {
            "net_diameter must be greater than 0"
        } else if self.route_cache_size == 0 {
            "route_cache_size must be greater than 0"
        } else if self.route_timeout == 0 {
            "route_timeout must be greater than 0"
        } else if self.rreq_interval == 0 {
            "rreq_interval must be greater than 0"
        } else {
            return Ok(());
        };
        Err(AodvError::new(AodvErrorKind::Configuration(String::from(err_msg))))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: AODV_UDP_PORT,
            net_diameter: NET_DIAMETER,
            route_timeout: ROUTE_TIMEOUT,
            rreq_interval: RREQ_INTERVAL,
            route_cache_size: ROUTE_CACHE_SIZE,
            fw_cache_size: FW_CACHE_SIZE,
            event_queue_size: EVENT_QUEUE_SIZE,
        }
    }
}

/// Where an outgoing message goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TxTarget {
    /// Link-local multicast group, with the given hop limit
    Multicast { ttl: u32 },
    /// A single neighbour
    Unicast(Ipv6Addr),
}

/// An encoded message waiting to be handed to the transport
#[derive(Debug, Clone)]
pub struct Transmission {
    pub target: TxTarget,
    pub payload: Vec<u8>,
    pub msg: Messages,
    pub ts: DateTime<Utc>,
}

/// Work staged by the engine and executed on a later turn of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingCommand {
    SendRouteRequest { target: Ipv6Addr },
    SendRouteError { destination: Ipv6Addr, last_known_seqno: u32 },
}

/// Outcome of a route request
#[derive(Debug, Clone, PartialEq)]
pub enum RouteStatus {
    /// A fresh route is cached
    Available(RouteEntry),
    /// A route request has been staged
    Discovering,
    /// Another command is still waiting to be sent
    RequestInProgress,
    /// The minimum interval between route requests has not elapsed
    RateLimited,
}

impl RouteStatus {
    pub fn into_route(self) -> Option<RouteEntry> {
        match self {
            RouteStatus::Available(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Implementation of the Ad-hoc On-Demand Distance Vector routing protocol
#[derive(Debug)]
pub struct AODV {
    me: Ipv6Addr,
    config: Config,
    seq: SequenceAuthority,
    route_table: RouteTable,
    rreq_cache: DuplicateCache,
    rate_limiter: RateLimiter,
    pending: Option<PendingCommand>,
    tx_queue: Sender<Transmission>,
    logger: Logger,
}

impl AODV {
    /// Instantiate a new handler for the AODV protocol
    pub fn new(
        me: Ipv6Addr,
        config: Config,
        rng: &mut StdRng,
        tx_queue: Sender<Transmission>,
        logger: Logger,
    ) -> Result<Self, AodvError> {
        config.validate()?;
        let cache_size = NonZeroUsize::new(config.route_cache_size).ok_or_else(|| {
            AodvError::new(AodvErrorKind::Configuration(String::from(
                "route_cache_size must be greater than 0",
            )))
        })?;
        let starting_rreq_id: u32 = rng.gen();

        Ok(AODV {
            me,
            config,
            seq: SequenceAuthority::new(0, starting_rreq_id),
            route_table: RouteTable::new(cache_size),
            rreq_cache: DuplicateCache::new(config.fw_cache_size),
            rate_limiter: RateLimiter::new(Duration::milliseconds(i64::from(config.rreq_interval))),
            pending: None,
            tx_queue,
            logger,
        })
    }

    pub fn me(&self) -> Ipv6Addr {
        self.me
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sequence(&self) -> &SequenceAuthority {
        &self.seq
    }

    pub fn routes(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn pending_command(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Deadline of the rate limiter, if armed
    pub fn rate_limit_deadline(&self) -> Option<DateTime<Utc>> {
        self.rate_limiter.deadline()
    }

    /// Fresh route lookup. Does not change the eviction order.
    pub fn lookup(&self, dest: &Ipv6Addr, now: DateTime<Utc>) -> Option<RouteEntry> {
        self.route_table.lookup_fresh(dest, now)
    }

    /// Returns a cached route or stages a route request for it.
    pub fn request_route_to(&mut self, host: Ipv6Addr, now: DateTime<Utc>) -> RouteStatus {
        if let Some(route) = self.route_table.lookup_fresh(&host, now) {
            debug!(self.logger, "Route exists in table"; "destination" => %host);
            self.route_table.touch(&host);
            return RouteStatus::Available(route);
        }

        if self.pending.is_some() {
            warn!(self.logger, "A command is being processed"; "destination" => %host);
            return RouteStatus::RequestInProgress;
        }

        if !self.rate_limiter.expired(now) {
            warn!(self.logger, "Route request has been made before timeout"; "destination" => %host);
            return RouteStatus::RateLimited;
        }

        info!(self.logger, "No known route. Starting discovery process."; "destination" => %host);
        self.pending = Some(PendingCommand::SendRouteRequest { target: host });
        self.rate_limiter.arm(now);
        RouteStatus::Discovering
    }

    /// Marks the route to `dest` as broken and stages a RERR for it.
    /// Returns false if another command is already staged.
    pub fn report_unreachable(&mut self, dest: Ipv6Addr) -> bool {
        let last_known_seqno = match self.route_table.mark_stale(&dest) {
            Some(entry) => entry.known_seq_no().unwrap_or(0),
            None => 0,
        };

        if self.pending.is_some() {
            warn!(self.logger, "A command is being processed. RERR not staged"; "destination" => %dest);
            return false;
        }

        info!(self.logger, "Destination unreachable"; "destination" => %dest, "seq_no" => last_known_seqno);
        self.pending = Some(PendingCommand::SendRouteError {
            destination: dest,
            last_known_seqno,
        });
        true
    }

    /// Executes the staged command, if any. The slot is cleared even when sending fails.
    pub fn run_pending_command(&mut self, now: DateTime<Utc>) -> Result<(), AodvError> {
        match self.pending.take() {
            Some(PendingCommand::SendRouteRequest { target }) => {
                if self.route_table.lookup_fresh(&target, now).is_some() {
                    debug!(self.logger, "Route found while the request was pending"; "destination" => %target);
                    return Ok(());
                }
                self.send_rreq(target, now)
            }
            Some(PendingCommand::SendRouteError {
                destination,
                last_known_seqno,
            }) => self.send_rerr(destination, last_known_seqno, now),
            None => Ok(()),
        }
    }

    /// Called when the rate-limiter timer fires. Returns true if a command is still staged.
    pub fn on_timer(&mut self, now: DateTime<Utc>) -> bool {
        if self.rate_limiter.expired(now) {
            self.rate_limiter.reset();
        }
        self.pending.is_some()
    }

    /// Drops all routing state and any staged work.
    pub fn shutdown(&mut self) {
        info!(self.logger, "Flushing routing table"; "routes" => self.route_table.len());
        self.pending = None;
        self.rate_limiter.reset();
        self.route_table.flush_all();
    }

    // **************************************************
    // ***************** Outgoing ***********************
    // **************************************************
    /// Floods a route request for `dest`.
    pub fn send_rreq(&mut self, dest: Ipv6Addr, now: DateTime<Utc>) -> Result<(), AodvError> {
        let mut flags = RREQFlags::empty();
        let dest_seq_no = match self.route_table.lookup_any(&dest).and_then(|e| e.known_seq_no()) {
            Some(seq) => seq,
            None => {
                flags.insert(RREQFlags::UNKNOWN_SEQUENCE_NUMBER);
                0
            }
        };
        let msg = RouteRequestMessage {
            flags,
            hop_count: 0,
            rreq_id: self.seq.next_request_id(),
            destination: dest,
            dest_seq_no,
            originator: self.me,
            orig_seq_no: self.seq.next_own_sequence(),
        };
        //So that this node does not re-process its own request
        self.rreq_cache.record(self.me, msg.rreq_id);

        info!(
            self.logger,
            "Route discovery process started";
            "destination" => %dest,
            "rreq_id" => msg.rreq_id,
        );
        let ttl = u32::from(self.config.net_diameter);
        self.queue_transmission(TxTarget::Multicast { ttl }, Messages::RREQ(msg), now)
    }

    /// Unicasts a route reply to `next_hop` with the configured route lifetime.
    pub fn send_rrep(
        &mut self,
        dest: Ipv6Addr,
        next_hop: Ipv6Addr,
        orig: Ipv6Addr,
        dest_seq_no: u32,
        hop_count: u8,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        let lifetime = self.config.route_timeout;
        self.send_rrep_with_lifetime(dest, next_hop, orig, dest_seq_no, hop_count, lifetime, now)
    }

    /// Floods a single-entry route error with a hop limit of 1.
    pub fn send_rerr(
        &mut self,
        dest: Ipv6Addr,
        seq_no: u32,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        let msg = RouteErrorMessage::single(dest, seq_no);
        self.queue_transmission(TxTarget::Multicast { ttl: 1 }, Messages::RERR(msg), now)
    }

    #[allow(clippy::too_many_arguments)]
    fn send_rrep_with_lifetime(
        &mut self,
        dest: Ipv6Addr,
        next_hop: Ipv6Addr,
        orig: Ipv6Addr,
        dest_seq_no: u32,
        hop_count: u8,
        lifetime: u32,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        let msg = RouteResponseMessage {
            flags: Default::default(),
            prefix_size: 0,
            hop_count,
            destination: dest,
            dest_seq_no,
            originator: orig,
            lifetime,
        };
        self.queue_transmission(TxTarget::Unicast(next_hop), Messages::RREP(msg), now)
    }

    fn queue_transmission(
        &self,
        target: TxTarget,
        msg: Messages,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        let payload = serialize_message(&msg)?;
        let tx = Transmission {
            target,
            payload,
            msg,
            ts: now,
        };
        self.tx_queue.send(tx).map_err(|e| {
            let msg = "Failed to queue message into tx_queue".to_string();
            AodvError {
                kind: AodvErrorKind::Contention(msg),
                cause: Some(Box::new(e)),
            }
        })
    }

    // **************************************************
    // ***************** Incoming ***********************
    // **************************************************
    /// Processes a datagram received from `source`.
    pub fn handle_packet(
        &mut self,
        source: Ipv6Addr,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        if source == self.me {
            debug!(self.logger, "Ignoring own datagram");
            return Ok(());
        }

        match message_type(data)? {
            MessageType::RREQ => {
                let msg = RouteRequestMessage::decode(data)?;
                self.refresh_neighbour(source, now);
                self.process_route_request_msg(source, msg, now)
            }
            MessageType::RREP => {
                let msg = RouteResponseMessage::decode(data)?;
                self.refresh_neighbour(source, now);
                self.process_route_response_msg(source, msg, now)
            }
            MessageType::RERR => {
                let msg = RouteErrorMessage::decode(data)?;
                self.refresh_neighbour(source, now);
                self.process_route_err_msg(source, msg, now)
            }
        }
    }

    //Whoever we heard from is one hop away.
    fn refresh_neighbour(&mut self, source: Ipv6Addr, now: DateTime<Utc>) {
        let expires_at = now + Duration::milliseconds(i64::from(self.config.route_timeout));
        let entry = RouteEntry::new(source, source, NEIGHBOUR_HOPS, None, expires_at);
        self.route_table.upsert(entry, now);
    }

    fn process_route_request_msg(
        &mut self,
        source: Ipv6Addr,
        msg: RouteRequestMessage,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        if msg.originator == self.me {
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::DROPPED,
                Some("OWN_RREQ"),
                None,
                &Messages::RREQ(msg),
            );
            return Ok(());
        }

        if self.rreq_cache.seen(&msg.originator, msg.rreq_id) {
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::DROPPED,
                Some("DUPLICATE"),
                None,
                &Messages::RREQ(msg),
            );
            return Ok(());
        }
        self.rreq_cache.record(msg.originator, msg.rreq_id);

        //Create/update the reverse route to the originator
        let hop_count = msg.hop_count.saturating_add(1);
        let expires_at = now + Duration::milliseconds(i64::from(self.config.route_timeout));
        let reverse = RouteEntry::new(
            msg.originator,
            source,
            hop_count,
            Some(msg.orig_seq_no),
            expires_at,
        );
        self.route_table.upsert(reverse, now);

        let unknown_seq = msg.flags.contains(RREQFlags::UNKNOWN_SEQUENCE_NUMBER);

        //This node generates an RREP if it is itself the destination
        if msg.destination == self.me {
            if !unknown_seq {
                self.seq.advance_to(msg.dest_seq_no);
            }
            let seq = self.seq.current_sequence();
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::ACCEPTED,
                Some("RREQ reached its destination"),
                Some("RREP"),
                &Messages::RREQ(msg.clone()),
            );
            return self.send_rrep(self.me, source, msg.originator, seq, NEIGHBOUR_HOPS, now);
        }

        //or it has an active route to the destination with a sequence at least as new
        if let Some(route) = self.route_table.lookup_fresh(&msg.destination, now) {
            if let Some(seq) = route.known_seq_no() {
                if unknown_seq || !seqno::is_newer(msg.dest_seq_no, seq) {
                    self.route_table.touch(&msg.destination);
                    logging::log_handle_message(
                        &self.logger,
                        &source,
                        MessageStatus::ACCEPTED,
                        Some("Valid route found"),
                        Some("RREP"),
                        &Messages::RREQ(msg.clone()),
                    );
                    let remaining = (route.expires_at - now).num_milliseconds().max(0) as u32;
                    return self.send_rrep_with_lifetime(
                        msg.destination,
                        source,
                        msg.originator,
                        seq,
                        route.hop_count.saturating_add(1),
                        remaining,
                        now,
                    );
                }
            }
        }

        //NOT producing an RREP. Prepare to forward RREQ.
        if hop_count >= self.config.net_diameter {
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::DROPPED,
                Some("NET_DIAMETER_REACHED"),
                None,
                &Messages::RREQ(msg),
            );
            return Ok(());
        }

        let mut fwd = msg;
        fwd.hop_count = hop_count;
        //Use the stored sequence number if it's larger than the requested one
        if let Some(seq) = self
            .route_table
            .lookup_any(&fwd.destination)
            .and_then(|e| e.known_seq_no())
        {
            if unknown_seq || seqno::is_newer(seq, fwd.dest_seq_no) {
                fwd.dest_seq_no = seq;
                fwd.flags.remove(RREQFlags::UNKNOWN_SEQUENCE_NUMBER);
            }
        }

        let fwd = Messages::RREQ(fwd);
        logging::log_handle_message(
            &self.logger,
            &source,
            MessageStatus::FORWARDING,
            None,
            None,
            &fwd,
        );
        let ttl = u32::from(self.config.net_diameter - hop_count);
        self.queue_transmission(TxTarget::Multicast { ttl }, fwd, now)
    }

    fn process_route_response_msg(
        &mut self,
        source: Ipv6Addr,
        msg: RouteResponseMessage,
        now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        if msg.destination == self.me {
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::DROPPED,
                Some("OWN_ROUTE"),
                None,
                &Messages::RREP(msg),
            );
            return Ok(());
        }

        //Create/update the route to the destination
        let expires_at = now + Duration::milliseconds(i64::from(msg.lifetime));
        let forward = RouteEntry::new(
            msg.destination,
            source,
            msg.hop_count,
            Some(msg.dest_seq_no),
            expires_at,
        );
        self.route_table.upsert(forward, now);

        //Is this node the ORIGINATOR?
        if msg.originator == self.me {
            logging::log_handle_message(
                &self.logger,
                &source,
                MessageStatus::ACCEPTED,
                Some("Route discovery completed"),
                None,
                &Messages::RREP(msg),
            );
            return Ok(());
        }

        let reverse = match self.route_table.lookup_fresh(&msg.originator, now) {
            Some(route) => {
                self.route_table.touch(&msg.originator);
                route
            }
            None => {
                logging::log_handle_message(
                    &self.logger,
                    &source,
                    MessageStatus::DROPPED,
                    Some("NO_ROUTE_TO_ORIGINATOR"),
                    None,
                    &Messages::RREP(msg),
                );
                return Ok(());
            }
        };

        //The reverse route stays alive for as long as the route it is carrying
        let active_until = now + Duration::milliseconds(i64::from(self.config.route_timeout));
        self.route_table.refresh(&msg.originator, active_until);

        let mut fwd = msg;
        fwd.hop_count = fwd.hop_count.saturating_add(1);
        let fwd = Messages::RREP(fwd);
        logging::log_handle_message(
            &self.logger,
            &source,
            MessageStatus::FORWARDING,
            None,
            None,
            &fwd,
        );
        self.queue_transmission(TxTarget::Unicast(reverse.next_hop), fwd, now)
    }

    fn process_route_err_msg(
        &mut self,
        source: Ipv6Addr,
        msg: RouteErrorMessage,
        _now: DateTime<Utc>,
    ) -> Result<(), AodvError> {
        let mut affected = 0usize;
        for dest in msg.destinations.iter() {
            if self
                .route_table
                .invalidate(&dest.address, Some(dest.seq_no))
                .is_some()
            {
                affected += 1;
            }
        }

        let (status, reason) = if affected > 0 {
            (MessageStatus::ACCEPTED, None)
        } else {
            (MessageStatus::DROPPED, Some("NO_AFFECTED_ROUTES"))
        };
        logging::log_handle_message(
            &self.logger,
            &source,
            status,
            reason,
            None,
            &Messages::RERR(msg),
        );
        Ok(())
    }
}
