//! Routing cache of the AODV engine. Keyed by destination and kept in least-recently-used order.
use crate::aodv::seqno;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::cmp::Ordering;
use std::net::Ipv6Addr;
use std::num::NonZeroUsize;

bitflags! {
    #[derive(Default)]
    pub struct RTEFlags : u32 {
        const VALID_SEQ_NO = 0b00000001;
        const STALE = 0b00000010;
    }
}

/// A route to a single destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub destination: Ipv6Addr,
    pub next_hop: Ipv6Addr,
    pub hop_count: u8,
    pub dest_sequence: u32,
    flags: RTEFlags,
    pub expires_at: DateTime<Utc>,
}

impl RouteEntry {
    /// Creates a new, non-stale entry. A `dest_sequence` of `None` marks the sequence number as unknown.
    pub fn new(
        destination: Ipv6Addr,
        next_hop: Ipv6Addr,
        hop_count: u8,
        dest_sequence: Option<u32>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut flags = RTEFlags::VALID_SEQ_NO;
        let seq = match dest_sequence {
            Some(seq) => seq,
            None => {
                flags.remove(RTEFlags::VALID_SEQ_NO);
                0
            }
        };
        RouteEntry {
            destination,
            next_hop,
            hop_count,
            dest_sequence: seq,
            flags,
            expires_at,
        }
    }

    pub fn has_valid_seqno(&self) -> bool {
        self.flags.contains(RTEFlags::VALID_SEQ_NO)
    }

    pub fn is_stale(&self) -> bool {
        self.flags.contains(RTEFlags::STALE)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Usable for route selection: neither stale nor expired.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_stale() && !self.is_expired(now)
    }

    /// The sequence number, if known.
    pub fn known_seq_no(&self) -> Option<u32> {
        if self.has_valid_seqno() {
            Some(self.dest_sequence)
        } else {
            None
        }
    }

    /// Whether `candidate` should replace the metadata of this entry.
    fn accepts(&self, candidate: &RouteEntry, now: DateTime<Utc>) -> bool {
        if !candidate.has_valid_seqno() {
            //Never preferred over a known sequence number.
            return !self.has_valid_seqno()
                && (candidate.hop_count < self.hop_count || self.is_stale() || self.is_expired(now));
        }
        if !self.has_valid_seqno() {
            return true;
        }
        match seqno::compare(candidate.dest_sequence, self.dest_sequence) {
            Ordering::Greater => true,
            Ordering::Equal => {
                candidate.hop_count < self.hop_count || self.is_stale() || self.is_expired(now)
            }
            Ordering::Less => false,
        }
    }
}

/// Fixed-capacity routing cache.
#[derive(Debug)]
pub struct RouteTable {
    routes: LruCache<Ipv6Addr, RouteEntry>,
}

impl RouteTable {
    /// Creates an empty table that holds at most `capacity` routes.
    pub fn new(capacity: NonZeroUsize) -> Self {
        RouteTable {
            routes: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.routes.cap().get()
    }

    /// Returns the route only if it is neither stale nor expired. Does not change the LRU order.
    pub fn lookup_fresh(&self, dest: &Ipv6Addr, now: DateTime<Utc>) -> Option<RouteEntry> {
        self.routes
            .peek(dest)
            .filter(|entry| entry.is_fresh(now))
            .cloned()
    }

    /// Returns the route regardless of its state. Used to recover the last known sequence number.
    pub fn lookup_any(&self, dest: &Ipv6Addr) -> Option<RouteEntry> {
        self.routes.peek(dest).cloned()
    }

    /// Moves the route to the most-recently-used position.
    pub fn touch(&mut self, dest: &Ipv6Addr) {
        self.routes.promote(dest);
    }

    /// Inserts the candidate route or merges it into the existing one following the
    /// freshness rules. Returns true if the route metadata was replaced.
    pub fn upsert(&mut self, candidate: RouteEntry, now: DateTime<Utc>) -> bool {
        let dest = candidate.destination;
        let accepted = match self.routes.peek(&dest) {
            Some(entry) => entry.accepts(&candidate, now),
            None => {
                if self.routes.len() >= self.capacity() {
                    self.evict(now);
                }
                self.routes.put(dest, candidate);
                return true;
            }
        };

        if accepted {
            if let Some(entry) = self.routes.get_mut(&dest) {
                *entry = candidate;
            }
        } else if let Some(entry) = self.routes.peek_mut(&dest) {
            //Same path confirmed again. Keep it alive for as long as either copy says.
            if entry.next_hop == candidate.next_hop && !entry.is_stale() {
                entry.expires_at = std::cmp::max(entry.expires_at, candidate.expires_at);
            }
        }

        accepted
    }

    /// Extends the lifetime of a route, if it exists, to at least `expires_at`.
    pub fn refresh(&mut self, dest: &Ipv6Addr, expires_at: DateTime<Utc>) {
        if let Some(entry) = self.routes.peek_mut(dest) {
            entry.expires_at = std::cmp::max(entry.expires_at, expires_at);
        }
    }

    /// Marks the route as suspected broken. Hop and sequence data is retained.
    pub fn mark_stale(&mut self, dest: &Ipv6Addr) -> Option<RouteEntry> {
        self.invalidate(dest, None)
    }

    /// Marks the route as stale and adopts `seq_no` if it is newer than the stored one.
    pub fn invalidate(&mut self, dest: &Ipv6Addr, seq_no: Option<u32>) -> Option<RouteEntry> {
        let entry = self.routes.peek_mut(dest)?;
        entry.flags.insert(RTEFlags::STALE);
        if let Some(seq) = seq_no {
            if !entry.has_valid_seqno() || seqno::is_newer(seq, entry.dest_sequence) {
                entry.dest_sequence = seq;
                entry.flags.insert(RTEFlags::VALID_SEQ_NO);
            }
        }
        Some(entry.clone())
    }

    /// Removes every route. Only used on shutdown.
    pub fn flush_all(&mut self) {
        self.routes.clear();
    }

    /// Routes from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter().map(|(_, entry)| entry)
    }

    //Stale or expired routes go first. Otherwise, plain LRU.
    fn evict(&mut self, now: DateTime<Utc>) -> Option<RouteEntry> {
        let victim = self
            .routes
            .iter()
            .rev()
            .find(|(_, entry)| !entry.is_fresh(now))
            .map(|(dest, _)| *dest);
        match victim {
            Some(dest) => self.routes.pop(&dest),
            None => self.routes.pop_lru().map(|(_, entry)| entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn addr(n: u16) -> Ipv6Addr {
        Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, n)
    }

    fn table(capacity: usize) -> RouteTable {
        RouteTable::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn route(dest: u16, hops: u8, seq: Option<u32>, now: DateTime<Utc>) -> RouteEntry {
        RouteEntry::new(addr(dest), addr(100 + hops as u16), hops, seq, now + Duration::seconds(10))
    }

    #[test]
    fn test_lookup_missing_route() {
        let rt = table(4);
        let now = Utc::now();
        assert!(rt.lookup_fresh(&addr(1), now).is_none());
        assert!(rt.lookup_any(&addr(1)).is_none());
    }

    #[test]
    fn test_newer_sequence_replaces() {
        let mut rt = table(4);
        let now = Utc::now();
        assert!(rt.upsert(route(1, 3, Some(5), now), now));
        assert!(rt.upsert(route(1, 6, Some(6), now), now));
        let entry = rt.lookup_fresh(&addr(1), now).unwrap();
        assert_eq!(entry.dest_sequence, 6);
        assert_eq!(entry.hop_count, 6);
    }

    #[test]
    fn test_older_sequence_is_ignored() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 3, Some(5), now), now);
        assert!(!rt.upsert(route(1, 1, Some(4), now), now));
        let entry = rt.lookup_any(&addr(1)).unwrap();
        assert_eq!(entry.dest_sequence, 5);
        assert_eq!(entry.hop_count, 3);
    }

    #[test]
    fn test_equal_sequence_needs_fewer_hops() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 3, Some(5), now), now);
        assert!(!rt.upsert(route(1, 4, Some(5), now), now));
        assert!(!rt.upsert(route(1, 3, Some(5), now), now));
        assert!(rt.upsert(route(1, 2, Some(5), now), now));
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().hop_count, 2);
    }

    #[test]
    fn test_wrapped_sequence_is_newer() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 3, Some(0xFFFF_FFFE), now), now);
        assert!(rt.upsert(route(1, 5, Some(2), now), now));
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().dest_sequence, 2);
    }

    #[test]
    fn test_unknown_sequence_never_displaces_known() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 4, Some(9), now), now);
        assert!(!rt.upsert(route(1, 1, None, now), now));
        let entry = rt.lookup_any(&addr(1)).unwrap();
        assert_eq!(entry.dest_sequence, 9);
        assert_eq!(entry.hop_count, 4);
        assert!(entry.has_valid_seqno());
    }

    #[test]
    fn test_known_sequence_replaces_unknown() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 1, None, now), now);
        assert!(rt.upsert(route(1, 7, Some(0), now), now));
        let entry = rt.lookup_any(&addr(1)).unwrap();
        assert!(entry.has_valid_seqno());
        assert_eq!(entry.dest_sequence, 0);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut rt = table(4);
        let now = Utc::now();
        let updates = [(5, 3), (4, 1), (5, 2), (7, 9), (6, 1), (7, 9), (7, 4), (0xFFFF_FFFF, 1)];
        let mut last: Option<(u32, u8)> = None;
        for &(seq, hops) in updates.iter() {
            rt.upsert(route(1, hops, Some(seq), now), now);
            let entry = rt.lookup_any(&addr(1)).unwrap();
            if let Some((prev_seq, prev_hops)) = last {
                assert_ne!(seqno::compare(entry.dest_sequence, prev_seq), Ordering::Less);
                if entry.hop_count != prev_hops {
                    let newer = seqno::is_newer(entry.dest_sequence, prev_seq);
                    let shorter = entry.dest_sequence == prev_seq && entry.hop_count < prev_hops;
                    assert!(newer || shorter);
                }
            }
            last = Some((entry.dest_sequence, entry.hop_count));
        }
        //(0xFFFF_FFFF) is older than 7
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().dest_sequence, 7);
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().hop_count, 4);
    }

    #[test]
    fn test_mark_stale_keeps_metadata() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 2, Some(5), now), now);
        let entry = rt.mark_stale(&addr(1)).unwrap();
        assert!(entry.is_stale());
        assert!(rt.lookup_fresh(&addr(1), now).is_none());
        let entry = rt.lookup_any(&addr(1)).unwrap();
        assert_eq!(entry.dest_sequence, 5);
        assert_eq!(entry.hop_count, 2);
        assert!(rt.mark_stale(&addr(2)).is_none());
    }

    #[test]
    fn test_invalidate_adopts_newer_sequence() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 2, Some(5), now), now);
        rt.invalidate(&addr(1), Some(4));
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().dest_sequence, 5);
        rt.invalidate(&addr(1), Some(8));
        assert_eq!(rt.lookup_any(&addr(1)).unwrap().dest_sequence, 8);
    }

    #[test]
    fn test_stale_route_is_revived_by_equal_sequence() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 2, Some(5), now), now);
        rt.mark_stale(&addr(1));
        assert!(rt.upsert(route(1, 3, Some(5), now), now));
        let entry = rt.lookup_fresh(&addr(1), now).unwrap();
        assert_eq!(entry.hop_count, 3);
    }

    #[test]
    fn test_expired_route_is_not_fresh() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 2, Some(5), now), now);
        let later = now + Duration::seconds(11);
        assert!(rt.lookup_fresh(&addr(1), later).is_none());
        assert!(rt.lookup_any(&addr(1)).is_some());
    }

    #[test]
    fn test_same_path_extends_lifetime() {
        let mut rt = table(4);
        let now = Utc::now();
        rt.upsert(route(1, 2, Some(5), now), now);
        let mut again = route(1, 2, None, now);
        again.expires_at = now + Duration::seconds(30);
        assert!(!rt.upsert(again, now));
        let entry = rt.lookup_any(&addr(1)).unwrap();
        assert_eq!(entry.expires_at, now + Duration::seconds(30));
        assert_eq!(entry.dest_sequence, 5);
    }

    #[test]
    fn test_lru_evicts_first_inserted() {
        let mut rt = table(3);
        let now = Utc::now();
        for i in 1..=4 {
            rt.upsert(route(i, 1, Some(1), now), now);
        }
        assert_eq!(rt.len(), 3);
        assert!(rt.lookup_any(&addr(1)).is_none());
        for i in 2..=4 {
            assert!(rt.lookup_any(&addr(i)).is_some());
        }
    }

    #[test]
    fn test_touch_preserves_entry() {
        let mut rt = table(3);
        let now = Utc::now();
        for i in 1..=3 {
            rt.upsert(route(i, 1, Some(1), now), now);
        }
        rt.touch(&addr(1));
        rt.upsert(route(4, 1, Some(1), now), now);
        assert!(rt.lookup_any(&addr(1)).is_some());
        assert!(rt.lookup_any(&addr(2)).is_none());
    }

    #[test]
    fn test_stale_entries_are_evicted_first() {
        let mut rt = table(3);
        let now = Utc::now();
        for i in 1..=3 {
            rt.upsert(route(i, 1, Some(1), now), now);
        }
        rt.mark_stale(&addr(3));
        rt.upsert(route(4, 1, Some(1), now), now);
        assert!(rt.lookup_any(&addr(1)).is_some());
        assert!(rt.lookup_any(&addr(2)).is_some());
        assert!(rt.lookup_any(&addr(3)).is_none());
    }

    #[test]
    fn test_flush_all() {
        let mut rt = table(3);
        let now = Utc::now();
        rt.upsert(route(1, 1, Some(1), now), now);
        rt.upsert(route(2, 1, Some(1), now), now);
        rt.flush_all();
        assert!(rt.is_empty());
        assert!(rt.lookup_any(&addr(1)).is_none());
    }
}
