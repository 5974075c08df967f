//! Seen-message cache used to suppress redelivery of circulating messages.
//!
//! The cache is not size-bounded. The node clears it wholesale on a fixed
//! period instead, so a message seen just before a clear can be processed a
//! second time afterwards.

use std::collections::HashSet;

#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<String>,
    clears: u64,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            clears: 0,
        }
    }

    /// Record `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_owned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Forget every id.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.clears += 1;
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Number of clears since creation.
    pub fn clears(&self) -> u64 {
        self.clears
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
