use super::{Key, ResourceName, SourceName};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a single collection produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectReport {
    pub item_count: u64,
    pub success: bool,
}

impl CollectReport {
    #[must_use]
    pub const fn collected(item_count: u64) -> Self {
        Self { item_count, success: true }
    }

    #[must_use]
    pub const fn failed() -> Self {
        Self {
            item_count: 0,
            success: false,
        }
    }
}

/// Fetches one source's data for a key.
///
/// A collector owns its own network I/O, retries, backoff and timeouts, and records a
/// collection stamp in the timestamp store when it succeeds. Returning an error and
/// returning a report with `success == false` mean the same thing to the coordinator.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, key: &Key) -> Result<CollectReport>;
}

/// The set of collectors the coordinator may invoke, one per source.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<SourceName, Arc<dyn Collector>>,
}

impl core::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CollectorRegistry")
            .field("sources", &self.collectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CollectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the collector for `source`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, source: SourceName, collector: Arc<dyn Collector>) -> Self {
        self.register(source, collector);
        self
    }

    pub fn register(&mut self, source: SourceName, collector: Arc<dyn Collector>) {
        _ = self.collectors.insert(source, collector);
    }

    #[must_use]
    pub fn get(&self, source: SourceName) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(&source)
    }

    /// Registered sources, in source order.
    pub fn sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.collectors.keys().copied()
    }

    /// The rate-limited resources needed to collect from `sources`, without duplicates, in acquisition order.
    #[must_use]
    pub fn resources_for(sources: impl IntoIterator<Item = SourceName>) -> Vec<ResourceName> {
        let resources: std::collections::BTreeSet<_> = sources.into_iter().filter_map(SourceName::resource).collect();
        resources.into_iter().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
