//! Bounded term-summary cache.
//!
//! Owned by an [`Index`](crate::index::Index), never global. Eviction is
//! oldest-inserted: the cache protects hot terms across a burst of lookups,
//! not across the lifetime of the process.

use std::collections::VecDeque;

use ahash::AHashMap;

use crate::postings::RecordSummary;

/// Bounded map from term to postings summary, evicting the oldest insertion
/// once `capacity` entries are held.
#[derive(Debug)]
pub struct TermInfoCache {
    map: AHashMap<String, RecordSummary>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TermInfoCache {
    /// Create a cache holding at most `capacity` terms. A capacity of zero
    /// disables caching entirely.
    pub fn new(capacity: usize) -> Self {
        TermInfoCache {
            map: AHashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Look up a cached summary.
    pub fn get(&self, term: &str) -> Option<&RecordSummary> {
        self.map.get(term)
    }

    /// Insert a summary, evicting the oldest entry when full.
    pub fn put(&mut self, term: String, summary: RecordSummary) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(term.clone(), summary).is_none() {
            self.order.push_back(term);
            while self.map.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
        }
    }

    /// Remove one term (after a direct mutation invalidates it).
    pub fn invalidate(&mut self, term: &str) {
        if self.map.remove(term).is_some() {
            self.order.retain(|t| t != term);
        }
    }

    /// Drop everything (after a commit swaps the store).
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Number of cached terms.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
