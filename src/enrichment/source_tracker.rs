//! Per-source collection counters for monitoring.

use super::SourceName;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::collections::BTreeMap;
use strum::{EnumCount, IntoEnumIterator};

/// Counters for a single source.
#[derive(Debug, Default)]
struct SourceCounter {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time copy of one source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Tracks how many collections were attempted per source and how they ended.
#[derive(Debug, Default)]
pub struct SourceTracker {
    counters: [SourceCounter; SourceName::COUNT],
}

impl SourceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark that a collection has started for `source`.
    pub fn attempt(&self, source: SourceName) {
        _ = self.counter(source).attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark that a collection for `source` has finished.
    pub fn complete(&self, source: SourceName, succeeded: bool) {
        let counter = self.counter(source);
        if succeeded {
            _ = counter.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            _ = counter.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn counts(&self, source: SourceName) -> SourceCounts {
        let counter = self.counter(source);
        SourceCounts {
            attempted: counter.attempted.load(Ordering::Relaxed),
            succeeded: counter.succeeded.load(Ordering::Relaxed),
            failed: counter.failed.load(Ordering::Relaxed),
        }
    }

    /// Counts for every source that has been attempted at least once.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<SourceName, SourceCounts> {
        SourceName::iter()
            .map(|source| (source, self.counts(source)))
            .filter(|(_, counts)| counts.attempted > 0)
            .collect()
    }

    fn counter(&self, source: SourceName) -> &SourceCounter {
        &self.counters[source as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_start_at_zero() {
        let tracker = SourceTracker::new();
        assert_eq!(tracker.counts(SourceName::Metadata), SourceCounts::default());
        assert!(tracker.snapshot().is_empty());
    }

    #[test]
    fn test_attempts_and_completions_are_tracked_per_source() {
        let tracker = SourceTracker::new();
        tracker.attempt(SourceName::Amazon);
        tracker.attempt(SourceName::Amazon);
        tracker.attempt(SourceName::EbaySold);
        tracker.complete(SourceName::Amazon, true);
        tracker.complete(SourceName::Amazon, false);

        assert_eq!(
            tracker.counts(SourceName::Amazon),
            SourceCounts {
                attempted: 2,
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(tracker.counts(SourceName::EbaySold).attempted, 1);
        assert_eq!(tracker.counts(SourceName::EbaySold).succeeded, 0);
    }

    #[test]
    fn test_snapshot_follows_source_order() {
        let tracker = SourceTracker::new();
        tracker.attempt(SourceName::EbaySold);
        tracker.attempt(SourceName::Metadata);
        tracker.attempt(SourceName::Zvab);

        let sources: Vec<_> = tracker.snapshot().into_keys().collect();
        assert_eq!(sources, vec![SourceName::Metadata, SourceName::Zvab, SourceName::EbaySold]);
    }

    #[test]
    fn test_last_source_has_a_counter() {
        let tracker = SourceTracker::new();
        let last = SourceName::iter().last().unwrap();
        tracker.attempt(last);
        assert_eq!(tracker.counts(last).attempted, 1);
    }
}
