//! Duplicate suppression by content digest.
//!
//! Remembers the SHA3-256 digest of every message admitted to dispatch. The
//! cache is bounded: when it is full it is cleared in one go before the next
//! digest is inserted. This is not LRU. A message seen just before a clear is
//! admitted again if it arrives just after.

use sha3::{Digest, Sha3_256};
use std::collections::HashSet;
use tracing::debug;

pub type MessageDigest = [u8; 32];

/// Bounded set of recently seen message digests
pub struct DedupCache {
    seen: HashSet<MessageDigest>,
    capacity: usize,
    suppressed: u64,
    clears: u64,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
            suppressed: 0,
            clears: 0,
        }
    }

    /// Digest of the raw message bytes
    pub fn digest(raw: &[u8]) -> MessageDigest {
        Sha3_256::digest(raw).into()
    }

    /// Record `raw` and report whether it is new
    ///
    /// Returns `false` for a message already in the cache; such a message
    /// must not be dispatched.
    pub fn admit(&mut self, raw: &[u8]) -> bool {
        let digest = Self::digest(raw);

        if self.seen.contains(&digest) {
            self.suppressed += 1;
            debug!(digest = %hex::encode(&digest[..8]), "Duplicate message suppressed");
            return false;
        }

        if self.seen.len() >= self.capacity {
            debug!(capacity = self.capacity, "Dedup cache full, clearing");
            self.seen.clear();
            self.clears += 1;
        }

        self.seen.insert(digest);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages rejected as duplicates so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Times the cache was cleared for being full
    pub fn clears(&self) -> u64 {
        self.clears
    }
}
