//! Message id generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates globally-unique 64-bit message ids.
///
/// Layout: high 16 bits are the peer id (mod 2^16), low 48 bits a counter
/// monotonic for the life of the process. Ids are unique across the cluster
/// as long as peer ids are unique mod 2^16 and a node does not mint more
/// than 2^48 ids between restarts.
pub struct MessageIdGenerator {
    prefix: u64,
    counter: AtomicU64,
}

const COUNTER_BITS: u32 = 48;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

impl MessageIdGenerator {
    pub fn new(peer_id: u64) -> Self {
        Self {
            prefix: (peer_id & 0xFFFF) << COUNTER_BITS,
            counter: AtomicU64::new(0),
        }
    }

    /// Resume from a persisted high-water mark so ids survive restarts.
    pub fn with_start(peer_id: u64, start: u64) -> Self {
        let generator = Self::new(peer_id);
        generator.counter.store(start & COUNTER_MASK, Ordering::SeqCst);
        generator
    }

    pub fn next(&self) -> u64 {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.prefix | (count & COUNTER_MASK)
    }

    /// Current counter value, persisted on shutdown.
    pub fn high_water(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Peer id embedded in a message id.
    pub fn peer_of(message_id: u64) -> u64 {
        message_id >> COUNTER_BITS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_carry_peer() {
        let idgen = MessageIdGenerator::new(7);
        let a = idgen.next();
        let b = idgen.next();
        assert!(b > a);
        assert_eq!(MessageIdGenerator::peer_of(a), 7);
        assert_eq!(a & COUNTER_MASK, 1);
    }

    #[test]
    fn peer_id_wraps_at_16_bits() {
        let idgen = MessageIdGenerator::new(0x1_0005);
        assert_eq!(MessageIdGenerator::peer_of(idgen.next()), 5);
    }

    #[test]
    fn resumes_from_high_water() {
        let idgen = MessageIdGenerator::with_start(1, 41);
        assert_eq!(idgen.next() & COUNTER_MASK, 42);
        assert_eq!(idgen.high_water(), 42);
    }
}
