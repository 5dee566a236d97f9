//! Sequence number bookkeeping, as per RFC 3561 section 6.1 "Maintaining Sequence Numbers".
use std::cmp::Ordering;

const HALF_RANGE: u32 = 0x8000_0000;

/// Compares two sequence numbers using signed 32-bit wraparound arithmetic.
/// `a` is newer than `b` iff `(a - b) as i32 > 0`.
///
/// Two numbers exactly 2^31 apart would be "older" than each other in both directions,
/// so that distance is reported as `Equal` and neither one is treated as newer.
pub fn compare(a: u32, b: u32) -> Ordering {
    let diff = a.wrapping_sub(b);
    if diff == HALF_RANGE {
        return Ordering::Equal;
    }
    (diff as i32).cmp(&0)
}

/// Shorthand for `compare(a, b) == Ordering::Greater`
pub fn is_newer(a: u32, b: u32) -> bool {
    compare(a, b) == Ordering::Greater
}

/// Owner of the sequence number and RREQ id of this node. Only the protocol engine advances them.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SequenceAuthority {
    my_sequence: u32,
    rreq_id: u32,
}

impl SequenceAuthority {
    /// Creates a new authority with the given starting values.
    pub fn new(my_sequence: u32, rreq_id: u32) -> Self {
        SequenceAuthority {
            my_sequence,
            rreq_id,
        }
    }

    /// Current sequence number of this node.
    pub fn current_sequence(&self) -> u32 {
        self.my_sequence
    }

    /// Id of the last RREQ originated by this node.
    pub fn current_request_id(&self) -> u32 {
        self.rreq_id
    }

    /// Increments and returns the sequence number of this node. Wraps at 2^32.
    pub fn next_own_sequence(&mut self) -> u32 {
        self.my_sequence = self.my_sequence.wrapping_add(1);
        self.my_sequence
    }

    /// Increments and returns the RREQ id.
    pub fn next_request_id(&mut self) -> u32 {
        self.rreq_id = self.rreq_id.wrapping_add(1);
        self.rreq_id
    }

    /// Moves the sequence number forward to `seq` if `seq` is newer. Never moves it back.
    pub fn advance_to(&mut self, seq: u32) -> u32 {
        if is_newer(seq, self.my_sequence) {
            self.my_sequence = seq;
        }
        self.my_sequence
    }
}
