//*****************
//External crates
//*****************
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate bitflags;

//*****************
//Modules declaration
//*****************
pub mod aodv;
pub mod driver;
pub mod logging;
pub mod node;

//*****************
//Constants
//*****************
pub const ONE_SECOND_MS: i64 = 1_000;

//*****************
//Errors
//*****************
use std::error::Error;
use std::fmt;

/// Error struct for this crate
#[derive(Debug)]
pub struct AodvError {
    pub cause: Option<Box<dyn Error + Send + Sync>>,
    pub kind: AodvErrorKind,
}

/// Types of errors produced in this crate
#[derive(Debug, Clone, PartialEq)]
pub enum AodvErrorKind {
    /// A datagram that does not match the layout of the message it claims to be
    MalformedMessage(String),
    /// The transport refused or failed to send a datagram
    TransportUnavailable(String),
    /// Socket or interface setup failures
    Networking(String),
    /// Failures related to [de]serializing data
    Serialization(String),
    /// Failures in configuration of the system
    Configuration(String),
    /// Errors from channels shared between threads
    Contention(String),
}

impl AodvError {
    /// Shorthand for an error with no underlying cause
    pub fn new(kind: AodvErrorKind) -> Self {
        AodvError { cause: None, kind }
    }

    /// True when the error comes from decoding an inbound datagram
    pub fn is_malformed(&self) -> bool {
        matches!(self.kind, AodvErrorKind::MalformedMessage(_))
    }
}

impl Error for AodvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.cause {
            Some(ref cause) => Some(&**cause),
            None => None,
        }
    }
}

impl fmt::Display for AodvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for AodvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AodvErrorKind::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            AodvErrorKind::TransportUnavailable(msg) => write!(f, "{}", msg),
            AodvErrorKind::Networking(msg) => write!(f, "{}", msg),
            AodvErrorKind::Serialization(msg) => write!(f, "{}", msg),
            AodvErrorKind::Configuration(msg) => write!(f, "{}", msg),
            AodvErrorKind::Contention(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<AodvErrorKind> for AodvError {
    fn from(kind: AodvErrorKind) -> AodvError {
        AodvError { cause: None, kind }
    }
}
