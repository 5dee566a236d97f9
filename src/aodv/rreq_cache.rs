//! Suppression cache for already processed route requests.
use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv6Addr;

/// A recently seen (originator, RREQ id) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateRecord {
    pub originator: Ipv6Addr,
    pub request_id: u32,
}

/// Fixed-size table of recently seen route requests. One record per bucket; a colliding
/// record overwrites the previous one, so an old duplicate may occasionally be processed again.
#[derive(Debug)]
pub struct DuplicateCache {
    records: Vec<Option<DuplicateRecord>>,
}

impl DuplicateCache {
    /// Creates an empty cache with `size` buckets. A size of 0 is bumped to 1.
    pub fn new(size: usize) -> Self {
        DuplicateCache {
            records: vec![None; std::cmp::max(size, 1)],
        }
    }

    /// Number of buckets
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Was this exact pair recorded, and not overwritten since?
    pub fn seen(&self, originator: &Ipv6Addr, request_id: u32) -> bool {
        let bucket = self.bucket(originator);
        match self.records[bucket] {
            Some(ref rec) => rec.originator == *originator && rec.request_id == request_id,
            None => false,
        }
    }

    /// Stores the pair, overwriting whatever occupied its bucket.
    pub fn record(&mut self, originator: Ipv6Addr, request_id: u32) {
        let bucket = self.bucket(&originator);
        self.records[bucket] = Some(DuplicateRecord {
            originator,
            request_id,
        });
    }

    fn bucket(&self, originator: &Ipv6Addr) -> usize {
        let digest = md5::compute(originator.octets());
        let hash = BigEndian::read_u32(&digest.0[..4]);
        hash as usize % self.records.len()
    }
}
