//! A bounded, TTL-aware in-memory cache of published outcomes.

use super::{EnrichmentOutcome, Key};
use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

const LOG_TARGET: &str = "     cache";

#[derive(Debug)]
struct CacheEntry {
    outcome: Arc<EnrichmentOutcome>,
    cached_at: Instant,
}

/// Maps keys to their most recently published outcome.
///
/// Entries at least `ttl` old read as misses and are dropped when read. Inserting past
/// `capacity` evicts the oldest entries first.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<Key, CacheEntry>>,
}

impl ResultCache {
    /// Create an empty cache. A zero `capacity` is treated as one.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The unexpired outcome for `key`, whether or not it succeeded.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Arc<EnrichmentOutcome>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries.get(key)?;
        let age = entry.cached_at.elapsed();
        if age >= self.ttl {
            log::debug!(target: LOG_TARGET, "Cache entry for '{key}' expired (age: {age:?}, TTL: {:?})", self.ttl);
            _ = entries.remove(key);
            return None;
        }

        Some(Arc::clone(&entry.outcome))
    }

    /// The unexpired outcome for `key`, only if it succeeded.
    ///
    /// Failed outcomes stay cached so that waiting callers can observe them, but they are
    /// never served as a fresh answer.
    #[must_use]
    pub fn get_successful(&self, key: &Key) -> Option<Arc<EnrichmentOutcome>> {
        self.get(key).filter(|outcome| outcome.success())
    }

    /// Cache `outcome` under its key, replacing any previous entry.
    pub fn insert(&self, outcome: Arc<EnrichmentOutcome>) {
        let key = outcome.key().clone();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        _ = entries.insert(
            key,
            CacheEntry {
                outcome,
                cached_at: Instant::now(),
            },
        );

        if entries.len() > self.capacity {
            let mut by_age: Vec<_> = entries.iter().map(|(key, entry)| (entry.cached_at, key.clone())).collect();
            by_age.sort_unstable();

            let excess = entries.len() - self.capacity;
            for (_, key) in by_age.into_iter().take(excess) {
                _ = entries.remove(&key);
            }

            log::debug!(target: LOG_TARGET, "Evicted {excess} oldest cache entries");
        }
    }

    pub fn remove(&self, key: &Key) {
        _ = self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of stored entries, including expired ones that have not been read since expiring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
