//! Wire format of the AODV control messages. All multi-byte fields are in network byte order.
use crate::{AodvError, AodvErrorKind};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use slog::{Record, Serializer, KV};
use std::convert::TryFrom;
use std::io::{Cursor, Read, Write};
use std::net::Ipv6Addr;

/// Size in bytes of an encoded RREQ
pub const RREQ_SIZE: usize = 48;
/// Size in bytes of an encoded RREP
pub const RREP_SIZE: usize = 44;
/// Size in bytes of the fixed part of a RERR
pub const RERR_HEADER_SIZE: usize = 4;
/// Size in bytes of each (address, seqno) pair carried by a RERR
pub const RERR_ENTRY_SIZE: usize = 20;

/// Type byte at the start of every message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageType {
    RREQ = 1,
    RREP = 2,
    RERR = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = AodvError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::RREQ),
            2 => Ok(MessageType::RREP),
            3 => Ok(MessageType::RERR),
            x => Err(malformed(format!("Unknown message type {}", x))),
        }
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RREQFlags: u8 {
        const UNKNOWN_SEQUENCE_NUMBER = 0b00000001;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RREPFlags: u8 {
        const REPAIR = 0b00000001;
        const ACK_REQUIRED = 0b00000010;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct RERRFlags: u8 {
        const NO_DELETE = 0b00000001;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequestMessage {
    pub flags: RREQFlags,
    pub hop_count: u8,
    pub rreq_id: u32,
    pub destination: Ipv6Addr,
    pub dest_seq_no: u32,
    pub originator: Ipv6Addr,
    pub orig_seq_no: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponseMessage {
    pub flags: RREPFlags,
    //Not used for routing. Carried for completeness.
    pub prefix_size: u8,
    pub hop_count: u8,
    pub destination: Ipv6Addr,
    pub dest_seq_no: u32,
    pub originator: Ipv6Addr,
    pub lifetime: u32, // In milliseconds
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnreachableDestination {
    pub address: Ipv6Addr,
    pub seq_no: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteErrorMessage {
    pub flags: RERRFlags,
    pub destinations: Vec<UnreachableDestination>,
}

///Messages used by the AODV protocol
#[derive(Debug, Clone, PartialEq)]
pub enum Messages {
    RREQ(RouteRequestMessage),
    RREP(RouteResponseMessage),
    RERR(RouteErrorMessage),
}

impl KV for Messages {
    fn serialize(&self, _rec: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        match *self {
            Messages::RREQ(ref m) => {
                serializer.emit_str("msg_type", "RREQ")?;
                serializer.emit_str("msg_source", &m.originator.to_string())?;
                serializer.emit_str("msg_destination", &m.destination.to_string())?;
                serializer.emit_u8("msg_hops", m.hop_count)?;
                serializer.emit_u32("rreq_id", m.rreq_id)
            }
            Messages::RREP(ref m) => {
                serializer.emit_str("msg_type", "RREP")?;
                serializer.emit_str("msg_source", &m.originator.to_string())?;
                serializer.emit_str("msg_destination", &m.destination.to_string())?;
                serializer.emit_u8("msg_hops", m.hop_count)?;
                serializer.emit_u32("dest_seq_no", m.dest_seq_no)
            }
            Messages::RERR(ref m) => {
                serializer.emit_str("msg_type", "RERR")?;
                serializer.emit_usize("msg_num_affected_destinations", m.destinations.len())
            }
        }
    }
}

impl RouteRequestMessage {
    /// Decodes a RREQ. Fails if the buffer is short or is not a RREQ.
    pub fn decode(data: &[u8]) -> Result<Self, AodvError> {
        check_header(data, MessageType::RREQ, RREQ_SIZE)?;
        let mut rdr = Cursor::new(data);
        rdr.set_position(1);
        let flags = RREQFlags::from_bits_truncate(rdr.read_u8().map_err(truncated)?);
        let _reserved = rdr.read_u8().map_err(truncated)?;
        let hop_count = rdr.read_u8().map_err(truncated)?;
        let rreq_id = rdr.read_u32::<BigEndian>().map_err(truncated)?;
        let destination = read_address(&mut rdr)?;
        let dest_seq_no = rdr.read_u32::<BigEndian>().map_err(truncated)?;
        let originator = read_address(&mut rdr)?;
        let orig_seq_no = rdr.read_u32::<BigEndian>().map_err(truncated)?;

        Ok(RouteRequestMessage {
            flags,
            hop_count,
            rreq_id,
            destination,
            dest_seq_no,
            originator,
            orig_seq_no,
        })
    }

    fn encode(&self, wtr: &mut Vec<u8>) -> std::io::Result<()> {
        wtr.write_u8(MessageType::RREQ as u8)?;
        wtr.write_u8(self.flags.bits())?;
        wtr.write_u8(0)?;
        wtr.write_u8(self.hop_count)?;
        wtr.write_u32::<BigEndian>(self.rreq_id)?;
        wtr.write_all(&self.destination.octets())?;
        wtr.write_u32::<BigEndian>(self.dest_seq_no)?;
        wtr.write_all(&self.originator.octets())?;
        wtr.write_u32::<BigEndian>(self.orig_seq_no)
    }
}

impl RouteResponseMessage {
    /// Decodes a RREP. Fails if the buffer is short or is not a RREP.
    pub fn decode(data: &[u8]) -> Result<Self, AodvError> {
        check_header(data, MessageType::RREP, RREP_SIZE)?;
        let mut rdr = Cursor::new(data);
        rdr.set_position(1);
        let flags = RREPFlags::from_bits_truncate(rdr.read_u8().map_err(truncated)?);
        let prefix_size = rdr.read_u8().map_err(truncated)?;
        let hop_count = rdr.read_u8().map_err(truncated)?;
        let destination = read_address(&mut rdr)?;
        let dest_seq_no = rdr.read_u32::<BigEndian>().map_err(truncated)?;
        let originator = read_address(&mut rdr)?;
        let lifetime = rdr.read_u32::<BigEndian>().map_err(truncated)?;

        Ok(RouteResponseMessage {
            flags,
            prefix_size,
            hop_count,
            destination,
            dest_seq_no,
            originator,
            lifetime,
        })
    }

    fn encode(&self, wtr: &mut Vec<u8>) -> std::io::Result<()> {
        wtr.write_u8(MessageType::RREP as u8)?;
        wtr.write_u8(self.flags.bits())?;
        wtr.write_u8(self.prefix_size)?;
        wtr.write_u8(self.hop_count)?;
        wtr.write_all(&self.destination.octets())?;
        wtr.write_u32::<BigEndian>(self.dest_seq_no)?;
        wtr.write_all(&self.originator.octets())?;
        wtr.write_u32::<BigEndian>(self.lifetime)
    }
}

impl RouteErrorMessage {
    /// A RERR naming a single unreachable destination.
    pub fn single(address: Ipv6Addr, seq_no: u32) -> Self {
        RouteErrorMessage {
            flags: Default::default(),
            destinations: vec![UnreachableDestination { address, seq_no }],
        }
    }

    /// Decodes a RERR. A declared count larger than the data present only yields the
    /// complete entries that fit in the buffer.
    pub fn decode(data: &[u8]) -> Result<Self, AodvError> {
        check_header(data, MessageType::RERR, RERR_HEADER_SIZE + RERR_ENTRY_SIZE)?;
        let mut rdr = Cursor::new(data);
        rdr.set_position(1);
        let flags = RERRFlags::from_bits_truncate(rdr.read_u8().map_err(truncated)?);
        let _reserved = rdr.read_u8().map_err(truncated)?;
        let declared = rdr.read_u8().map_err(truncated)? as usize;
        if declared == 0 {
            return Err(malformed(String::from("RERR names no destinations")));
        }

        let present = (data.len() - RERR_HEADER_SIZE) / RERR_ENTRY_SIZE;
        let count = std::cmp::min(declared, present);
        let mut destinations = Vec::with_capacity(count);
        for _ in 0..count {
            let address = read_address(&mut rdr)?;
            let seq_no = rdr.read_u32::<BigEndian>().map_err(truncated)?;
            destinations.push(UnreachableDestination { address, seq_no });
        }

        Ok(RouteErrorMessage {
            flags,
            destinations,
        })
    }

    fn encode(&self, wtr: &mut Vec<u8>) -> std::io::Result<()> {
        wtr.write_u8(MessageType::RERR as u8)?;
        wtr.write_u8(self.flags.bits())?;
        wtr.write_u8(0)?;
        wtr.write_u8(self.destinations.len() as u8)?;
        for dest in self.destinations.iter() {
            wtr.write_all(&dest.address.octets())?;
            wtr.write_u32::<BigEndian>(dest.seq_no)?;
        }
        Ok(())
    }
}

/// Reads the common header of a datagram.
pub fn message_type(data: &[u8]) -> Result<MessageType, AodvError> {
    match data.first() {
        Some(b) => MessageType::try_from(*b),
        None => Err(malformed(String::from("Empty datagram"))),
    }
}

/// Encodes a message into its wire format.
pub fn serialize_message(msg: &Messages) -> Result<Vec<u8>, AodvError> {
    let mut wtr = Vec::with_capacity(RREQ_SIZE);
    let res = match msg {
        Messages::RREQ(m) => m.encode(&mut wtr),
        Messages::RREP(m) => m.encode(&mut wtr),
        Messages::RERR(m) => {
            if m.destinations.is_empty() || m.destinations.len() > u8::MAX as usize {
                let err_msg = format!(
                    "RERR must carry between 1 and 255 destinations, not {}",
                    m.destinations.len()
                );
                return Err(AodvError::new(AodvErrorKind::Serialization(err_msg)));
            }
            m.encode(&mut wtr)
        }
    };

    res.map_err(|e| {
        let err_msg = String::from("Error serializing message");
        AodvError {
            kind: AodvErrorKind::Serialization(err_msg),
            cause: Some(Box::new(e)),
        }
    })?;

    Ok(wtr)
}

/// Decodes any of the three control messages.
pub fn deserialize_message(data: &[u8]) -> Result<Messages, AodvError> {
    match message_type(data)? {
        MessageType::RREQ => RouteRequestMessage::decode(data).map(Messages::RREQ),
        MessageType::RREP => RouteResponseMessage::decode(data).map(Messages::RREP),
        MessageType::RERR => RouteErrorMessage::decode(data).map(Messages::RERR),
    }
}

fn check_header(data: &[u8], expected: MessageType, min_size: usize) -> Result<(), AodvError> {
    let msg_type = message_type(data)?;
    if msg_type != expected {
        return Err(malformed(format!("Expected {:?}, found {:?}", expected, msg_type)));
    }
    if data.len() < min_size {
        return Err(malformed(format!(
            "{:?} is too short, is {} expected at least {}",
            expected,
            data.len(),
            min_size
        )));
    }
    Ok(())
}

fn read_address(rdr: &mut Cursor<&[u8]>) -> Result<Ipv6Addr, AodvError> {
    let mut octets = [0u8; 16];
    rdr.read_exact(&mut octets).map_err(truncated)?;
    Ok(Ipv6Addr::from(octets))
}

fn malformed(msg: String) -> AodvError {
    AodvError::new(AodvErrorKind::MalformedMessage(msg))
}

fn truncated(e: std::io::Error) -> AodvError {
    AodvError {
        kind: AodvErrorKind::MalformedMessage(String::from("Datagram ended unexpectedly")),
        cause: Some(Box::new(e)),
    }
}
