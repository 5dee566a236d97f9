//! This module implements the commands a node accepts after it has started.

use crate::aodv::RouteStatus;
use crate::{AodvError, AodvErrorKind};
use crossbeam_channel::Sender;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// Enummeration of all the commands the node supports
#[derive(Debug, Clone)]
pub enum Commands {
    ///Find a route to the destination. The outcome is sent on `reply`, if present.
    RequestRoute {
        destination: Ipv6Addr,
        reply: Option<Sender<RouteStatus>>,
    },
    ///The layer above could not reach the destination. `reply` receives true once the RERR is staged.
    ReportUnreachable {
        destination: Ipv6Addr,
        reply: Option<Sender<bool>>,
    },
    ///Stop the node
    Finish,
}

impl FromStr for Commands {
    type Err = AodvError;

    fn from_str(s: &str) -> Result<Commands, AodvError> {
        let parts: Vec<&str> = s.split_whitespace().collect();

        if parts.is_empty() {
            let err_msg = String::from("Empty command");
            return Err(AodvError::new(AodvErrorKind::Configuration(err_msg)));
        }

        match parts[0].to_uppercase().as_str() {
            "ROUTE" => {
                let destination = parse_address(&parts, "Route")?;
                Ok(Commands::RequestRoute {
                    destination,
                    reply: None,
                })
            }
            "UNREACHABLE" => {
                let destination = parse_address(&parts, "Unreachable")?;
                Ok(Commands::ReportUnreachable {
                    destination,
                    reply: None,
                })
            }
            "FINISH" => Ok(Commands::Finish),
            _ => {
                let err_msg = format!("Unsupported node command: {:?}", parts);
                Err(AodvError::new(AodvErrorKind::Configuration(err_msg)))
            }
        }
    }
}

fn parse_address(parts: &[&str], cmd: &str) -> Result<Ipv6Addr, AodvError> {
    if parts.len() < 2 {
        let err_msg = format!("{} needs one parameter: the destination address.", cmd);
        return Err(AodvError::new(AodvErrorKind::Configuration(err_msg)));
    }
    parts[1].parse::<Ipv6Addr>().map_err(|e| {
        let err_msg = format!("Invalid IPv6 address: {}", parts[1]);
        AodvError {
            kind: AodvErrorKind::Configuration(err_msg),
            cause: Some(Box::new(e)),
        }
    })
}
