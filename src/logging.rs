//! Module related to creating the loggers of a node and recording the control messages it handles.

// Lint options for this module
#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

use crate::aodv::{Transmission, TxTarget};
use crate::{AodvError, AodvErrorKind};
use slog::{Drain, Key, Logger, Record, Serializer, Value, KV};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::net::Ipv6Addr;
use std::path::Path;

/// Directory name for where the logs will be placed.
pub const LOG_DIR_NAME: &str = "log";
const LOG_CHANNEL_SIZE: usize = 512; //Default is 128
const LOG_THREAD_NAME: &str = "LoggerThread";

/// Enum that represents the possible status of a Message as it moves through the network
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageStatus {
    /// The message has reached its destination.
    ACCEPTED,
    /// The message has been dropped. The *reason* field should provide more data.
    DROPPED,
    /// The message has reached an intermediate node and will be forwarded.
    FORWARDING,
    /// A new message has been transmitted
    SENT,
    /// The message could not be handed to the transport.
    FAILED,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MessageStatus::ACCEPTED => write!(f, "ACCEPTED"),
            MessageStatus::DROPPED => write!(f, "DROPPED"),
            MessageStatus::FORWARDING => write!(f, "FORWARDING"),
            MessageStatus::SENT => write!(f, "SENT"),
            MessageStatus::FAILED => write!(f, "FAILED"),
        }
    }
}

impl Value for MessageStatus {
    fn serialize(&self, _rec: &Record, key: Key, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str(key, &self.to_string())
    }
}

/// Logs an incoming message
pub fn log_handle_message<T: KV>(
    logger: &Logger,
    source: &Ipv6Addr,
    status: MessageStatus,
    reason: Option<&str>,
    action: Option<&str>,
    msg: &T,
) {
    info!(
        logger,
        "Received message";
        msg,
        "source" => %source,
        "action" => action.unwrap_or(""),
        "reason" => reason.unwrap_or(""),
        "status" => status,
    );
}

/// Logs an outgoing message
pub fn log_tx(logger: &Logger, tx: &Transmission, status: MessageStatus, reason: Option<&str>) {
    let (destination, ttl) = match tx.target {
        TxTarget::Multicast { ttl } => (String::from("MULTICAST"), ttl),
        TxTarget::Unicast(next_hop) => (next_hop.to_string(), 1),
    };
    let out_queued_duration = chrono::Utc::now()
        .signed_duration_since(tx.ts)
        .num_microseconds()
        .unwrap_or(0);
    info!(
        logger,
        "Message sent";
        &tx.msg,
        "size" => tx.payload.len(),
        "ttl" => ttl,
        "destination" => destination,
        "out_queued_duration" => out_queued_duration,
        "reason" => reason.unwrap_or(""),
        "status" => status,
    );
}

/// Creates a logger that writes JSON records to `log_file_name`, and optionally to the terminal as well.
pub fn create_logger<P: AsRef<Path>>(log_file_name: P, log_term: bool) -> Result<Logger, AodvError> {
    //Make sure the full path is valid
    if let Some(parent) = log_file_name.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            let err_msg = format!("Could not create log directory {:?}", parent);
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_file_name.as_ref())
        .map_err(|e| {
            let err_msg = format!("Could not open log file {:?}", log_file_name.as_ref());
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;

    if log_term {
        Ok(create_term_and_file_logger(log_file))
    } else {
        Ok(create_file_logger(log_file))
    }
}

fn create_file_logger(log_file: File) -> Logger {
    let d2 = slog_json::Json::new(log_file)
        .add_default_keys()
        .build()
        .fuse();
    let d2 = slog_async::Async::new(d2)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("File{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    Logger::root(d2, o!())
}

fn create_term_and_file_logger(log_file: File) -> Logger {
    //Create the terminal drain
    let decorator = slog_term::TermDecorator::new().build();
    let d1 = slog_term::CompactFormat::new(decorator).build().fuse();
    let d1 = slog_async::Async::new(d1)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("Term{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    //Create the file drain
    let d2 = slog_json::Json::new(log_file)
        .add_default_keys()
        .build()
        .fuse();
    let d2 = slog_async::Async::new(d2)
        .chan_size(LOG_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Drop)
        .thread_name(format!("File{}", LOG_THREAD_NAME))
        .build()
        .fuse();

    //Fuse the drains and create the logger
    Logger::root(slog::Duplicate::new(d1, d2).fuse(), o!())
}

/// Creates a logger that discards all records. Used for tests that don't need logs.
pub fn create_discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
