use super::{
    CollectorRegistry, DerivedComputation, EnrichError, EnrichmentOutcome, FreshnessOracle, HookStats, HookWorker, Key, OutcomeError,
    RateLimiterSet, RateLimiterSnapshot, ResultCache, SourceCounts, SourceName, SourceOutcome, SourceTracker,
    TimestampStore,
};
use crate::Result;
use crate::config::Config;
use chrono::Utc;
use core::time::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;

const LOG_TARGET: &str = "    enrich";

/// Turns a caller-supplied identifier into a key, or rejects it.
pub type Normalizer = fn(&str) -> Option<Key>;

/// Per-call options for [`EnrichmentCoordinator::enrich`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Ignore cached outcomes and collect every selected source.
    pub force_refresh: bool,

    /// When another call is already collecting the key, wait for its outcome instead of failing.
    pub wait_for_in_progress: bool,

    /// Restrict the call to these sources. `None` selects every registered source.
    pub sources: Option<Vec<SourceName>>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            wait_for_in_progress: true,
            sources: None,
        }
    }
}

impl EnrichOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn no_wait() -> Self {
        Self {
            wait_for_in_progress: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceName>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }
}

/// A point-in-time view of the coordinator for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    /// Keys currently being collected.
    pub in_flight: usize,
    /// Cache entries, including expired ones not yet evicted.
    pub cached: usize,
    /// Callers currently waiting on another call's collection.
    pub waiters: usize,
    pub rate_limiters: Vec<RateLimiterSnapshot>,
    pub sources: BTreeMap<SourceName, SourceCounts>,
    pub hook: Option<HookStats>,
}

/// Carries the leader's outcome to its followers once published.
type Completion = Option<Arc<EnrichmentOutcome>>;

/// Present while a key is being collected.
#[derive(Debug, Default)]
struct InFlightEntry {
    /// Created when the first follower arrives.
    completion: Option<watch::Sender<Completion>>,
}

/// One collector's result, before it is paired with the source's staleness.
#[derive(Debug)]
struct Collected {
    item_count: u64,
    error: Option<String>,
}

enum Admission {
    Leader,
    Follower(watch::Receiver<Completion>),
    Cached(Arc<EnrichmentOutcome>),
    Rejected,
}

/// Coordinates enrichment of keys across collectors.
///
/// For any key, at most one call (the leader) collects at a time. Concurrent calls for the
/// same key either wait for the leader's outcome or are rejected. Outcomes are cached briefly,
/// rate limits are taken before any collector runs, and a failing source is recorded in the
/// outcome rather than failing the call.
pub struct EnrichmentCoordinator {
    collectors: CollectorRegistry,
    oracle: FreshnessOracle,
    rate_limiters: RateLimiterSet,
    cache: ResultCache,
    in_flight: Mutex<HashMap<Key, InFlightEntry>>,
    tracker: SourceTracker,
    hook: Option<HookWorker>,
    normalizer: Normalizer,
    follower_wait: Duration,
    rate_limit_timeout: Duration,
    collection_deadline: Option<Duration>,
}

impl core::fmt::Debug for EnrichmentCoordinator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EnrichmentCoordinator")
            .field("collectors", &self.collectors)
            .field("oracle", &self.oracle)
            .field("cache", &self.cache)
            .field("hook", &self.hook)
            .field("follower_wait", &self.follower_wait)
            .field("rate_limit_timeout", &self.rate_limit_timeout)
            .field("collection_deadline", &self.collection_deadline)
            .finish_non_exhaustive()
    }
}

impl EnrichmentCoordinator {
    /// Build a coordinator.
    ///
    /// Fails if the freshness policy has no max age for a registered source. When a hook is
    /// given its worker tasks are spawned, so this must run inside a tokio runtime.
    pub fn new(
        config: &Config,
        collectors: CollectorRegistry,
        store: Arc<dyn TimestampStore>,
        hook: Option<Arc<dyn DerivedComputation>>,
    ) -> Result<Self> {
        let policy = config.freshness_policy();
        policy.ensure_covers(collectors.sources())?;

        Ok(Self {
            collectors,
            oracle: FreshnessOracle::new(store, policy).with_store_timeout(config.store_timeout),
            rate_limiters: config.rate_limiters(),
            cache: ResultCache::new(config.cache_ttl, config.cache_capacity),
            in_flight: Mutex::new(HashMap::new()),
            tracker: SourceTracker::new(),
            hook: hook.map(|hook| HookWorker::spawn(hook, config.hook_options())),
            normalizer: Key::from_isbn,
            follower_wait: config.follower_wait,
            rate_limit_timeout: config.rate_limit_timeout,
            collection_deadline: config.collection_deadline,
        })
    }

    /// Replace the ISBN normalizer applied to identifiers passed to [`Self::enrich`].
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Enrich one identifier.
    ///
    /// Returns the cached outcome when one is fresh, otherwise joins or starts a collection.
    /// Per-source failures are reported inside the outcome; only admission problems and rate
    /// limiting are returned as errors.
    pub async fn enrich(&self, raw: &str, options: EnrichOptions) -> Result<Arc<EnrichmentOutcome>, EnrichError> {
        let key = (self.normalizer)(raw).ok_or_else(|| EnrichError::InvalidKey(raw.to_string()))?;

        if !options.force_refresh
            && let Some(outcome) = self.cache.get_successful(&key)
        {
            log::debug!(target: LOG_TARGET, "Cache hit for '{key}'");
            return Ok(outcome);
        }

        match self.admit(&key, &options) {
            Admission::Cached(outcome) => {
                log::debug!(target: LOG_TARGET, "Cache hit for '{key}' on admission");
                Ok(outcome)
            }
            Admission::Rejected => {
                log::debug!(target: LOG_TARGET, "Enrichment of '{key}' already in progress, not waiting");
                Err(EnrichError::AlreadyInProgress(key))
            }
            Admission::Follower(completion) => self.follow(key, completion).await,
            Admission::Leader => self.lead(key, &options).await,
        }
    }

    /// Atomically decide this call's role for `key`.
    fn admit(&self, key: &Key, options: &EnrichOptions) -> Admission {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = in_flight.get_mut(key) {
            if !options.wait_for_in_progress {
                return Admission::Rejected;
            }

            let completion = entry.completion.get_or_insert_with(|| watch::channel(None).0);
            return Admission::Follower(completion.subscribe());
        }

        // A leader may have published between the fast path and taking the lock
        if !options.force_refresh
            && let Some(outcome) = self.cache.get_successful(key)
        {
            return Admission::Cached(outcome);
        }

        _ = in_flight.insert(key.clone(), InFlightEntry::default());
        Admission::Leader
    }

    async fn follow(&self, key: Key, mut completion: watch::Receiver<Completion>) -> Result<Arc<EnrichmentOutcome>, EnrichError> {
        log::debug!(target: LOG_TARGET, "Waiting for in-progress enrichment of '{key}'");

        let published = match tokio::time::timeout(self.follower_wait, completion.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) => None,
            Err(_) => {
                log::warn!(target: LOG_TARGET, "Gave up waiting for enrichment of '{key}' after {:?}", self.follower_wait);
                return Err(EnrichError::TimedOut {
                    key,
                    waited: self.follower_wait,
                });
            }
        };

        // The leader hands its outcome over directly; the cache may already have evicted it
        published
            .or_else(|| self.cache.get(&key))
            .ok_or(EnrichError::StillInProgress(key))
    }

    async fn lead(&self, key: Key, options: &EnrichOptions) -> Result<Arc<EnrichmentOutcome>, EnrichError> {
        log::debug!(target: LOG_TARGET, "Starting enrichment of '{key}'");

        let guard = LeaderGuard {
            coordinator: self,
            key: key.clone(),
            started: Instant::now(),
            armed: true,
        };

        let sources = self.selected_sources(options);
        let resources = CollectorRegistry::resources_for(sources.iter().copied());

        if let Err(resource) = self.rate_limiters.acquire_all(resources, self.rate_limit_timeout).await {
            log::warn!(target: LOG_TARGET, "Aborting enrichment of '{key}': no '{resource}' token within {:?}", self.rate_limit_timeout);
            let outcome = EnrichmentOutcome::aborted(key.clone(), OutcomeError::RateLimited(resource), guard.started.elapsed(), Utc::now());
            _ = guard.publish(outcome);
            return Err(EnrichError::RateLimited { key, resource });
        }

        let report = self.oracle.decide(&key, sources.iter().copied(), options.force_refresh, Utc::now()).await;
        let mut results = self.collect(&key, report.decision.stale_sources()).await;

        let per_source = report
            .decision
            .iter()
            .map(|(source, staleness)| {
                let outcome = if !staleness.needs_collection() {
                    SourceOutcome::skipped(staleness)
                } else {
                    match results.remove(&source) {
                        Some(Collected { item_count, error: None }) => SourceOutcome::succeeded(staleness, item_count),
                        Some(Collected {
                            item_count,
                            error: Some(message),
                        }) => SourceOutcome::failed(staleness, item_count, message),
                        None => SourceOutcome::failed(staleness, 0, "no collector registered"),
                    }
                };
                (source, outcome)
            })
            .collect();

        let outcome = EnrichmentOutcome::assemble(
            key.clone(),
            per_source,
            report.degraded.into_iter().collect(),
            guard.started.elapsed(),
            Utc::now(),
        );
        log_completion(&outcome);

        let outcome = guard.publish(outcome);

        if outcome.made_progress()
            && let Some(hook) = &self.hook
        {
            _ = hook.submit(key, Arc::clone(&outcome));
        }

        Ok(outcome)
    }

    /// The registered sources this call should consider, in source order.
    fn selected_sources(&self, options: &EnrichOptions) -> Vec<SourceName> {
        match &options.sources {
            None => self.collectors.sources().collect(),
            Some(requested) => {
                let requested: BTreeSet<_> = requested.iter().copied().collect();
                requested.into_iter().filter(|source| self.collectors.get(*source).is_some()).collect()
            }
        }
    }

    /// Run the collectors for `sources` concurrently and record each one's item count or failure.
    ///
    /// A collector that errors, reports failure, panics or outlives the collection deadline
    /// counts as that source failing. Other sources are unaffected. If this future is dropped
    /// part way, the collectors still running are aborted and counted as failed.
    async fn collect(&self, key: &Key, sources: impl Iterator<Item = SourceName>) -> BTreeMap<SourceName, Collected> {
        let mut tasks = JoinSet::new();
        let mut pending = PendingSources {
            tracker: &self.tracker,
            by_task: HashMap::new(),
        };
        let mut results = BTreeMap::new();

        for source in sources {
            let Some(collector) = self.collectors.get(source).map(Arc::clone) else {
                continue;
            };

            self.tracker.attempt(source);
            let key = key.clone();
            let handle = tasks.spawn(async move { collector.collect(&key).await });
            _ = pending.by_task.insert(handle.id(), source);
        }

        let deadline = self.collection_deadline.map(|d| Instant::now() + d);

        loop {
            let next = match deadline {
                Some(deadline) => {
                    if let Ok(next) = tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                        next
                    } else {
                        tasks.abort_all();
                        break;
                    }
                }
                None => tasks.join_next_with_id().await,
            };

            let Some(joined) = next else {
                break;
            };

            let (id, collected) = match joined {
                Ok((id, Ok(report))) if report.success => (
                    id,
                    Collected {
                        item_count: report.item_count,
                        error: None,
                    },
                ),
                Ok((id, Ok(report))) => (
                    id,
                    Collected {
                        item_count: report.item_count,
                        error: Some(format!("collector reported failure after {} item(s)", report.item_count)),
                    },
                ),
                Ok((id, Err(e))) => (id, Collected::failed(format!("{e:#}"))),
                Err(e) if e.is_panic() => (e.id(), Collected::failed("collector panicked")),
                Err(e) => (e.id(), Collected::failed(format!("collector task failed: {e}"))),
            };

            let Some(source) = pending.by_task.remove(&id) else {
                continue;
            };

            if let Some(message) = &collected.error {
                log::warn!(target: LOG_TARGET, "Source '{source}' failed for '{key}': {message}");
            }
            self.tracker.complete(source, collected.error.is_none());
            _ = results.insert(source, collected);
        }

        for (_, source) in pending.by_task.drain() {
            log::warn!(target: LOG_TARGET, "Collector for '{source}' on '{key}' missed the collection deadline");
            self.tracker.complete(source, false);
            _ = results.insert(source, Collected::failed("collection deadline exceeded"));
        }

        results
    }

    /// Cache the outcome, retire the in-flight entry, then wake any followers.
    fn publish(&self, key: &Key, outcome: Arc<EnrichmentOutcome>) {
        self.cache.insert(Arc::clone(&outcome));

        let entry = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(key);

        if let Some(completion) = entry.and_then(|entry| entry.completion) {
            _ = completion.send_replace(Some(outcome));
        }
    }

    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        let (in_flight, waiters) = {
            let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let waiters = in_flight
                .values()
                .filter_map(|entry| entry.completion.as_ref())
                .map(watch::Sender::receiver_count)
                .sum();
            (in_flight.len(), waiters)
        };

        CoordinatorStats {
            in_flight,
            cached: self.cache.len(),
            waiters,
            rate_limiters: self.rate_limiters.snapshots(),
            sources: self.tracker.snapshot(),
            hook: self.hook.as_ref().map(HookWorker::stats),
        }
    }

    /// Drop every cached outcome. Collections in progress are unaffected.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &Key) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }

    #[must_use]
    pub const fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }
}

/// Publishes the leader's outcome on every exit path.
///
/// If the leader panics or its future is dropped before publishing, the guard publishes an
/// aborted outcome so the key never stays in flight.
struct LeaderGuard<'a> {
    coordinator: &'a EnrichmentCoordinator,
    key: Key,
    started: Instant,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn publish(mut self, outcome: EnrichmentOutcome) -> Arc<EnrichmentOutcome> {
        self.armed = false;
        let outcome = Arc::new(outcome);
        self.coordinator.publish(&self.key, Arc::clone(&outcome));
        outcome
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::error!(target: LOG_TARGET, "Enrichment of '{}' was aborted before completing", self.key);
            let outcome = EnrichmentOutcome::aborted(self.key.clone(), OutcomeError::Aborted, self.started.elapsed(), Utc::now());
            self.coordinator.publish(&self.key, Arc::new(outcome));
        }
    }
}

impl Collected {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            item_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Collector tasks that have not reported yet, keyed by task.
///
/// Whatever is left when this is dropped never finished, so it is counted as failed.
struct PendingSources<'a> {
    tracker: &'a SourceTracker,
    by_task: HashMap<Id, SourceName>,
}

impl Drop for PendingSources<'_> {
    fn drop(&mut self) {
        for source in self.by_task.values() {
            self.tracker.complete(*source, false);
        }
    }
}

fn log_completion(outcome: &EnrichmentOutcome) {
    let key = outcome.key();

    if let Some(error) = outcome.error() {
        log::error!(target: LOG_TARGET, "Enrichment of '{key}' failed: {error}");
        return;
    }

    let attempted = outcome.attempted_sources().count();
    let failed: Vec<_> = outcome.failed_sources().map(SourceName::name).collect();
    if failed.is_empty() {
        log::info!(target: LOG_TARGET, "Enriched '{key}' from {attempted} source(s) in {:.2?}", outcome.duration());
    } else {
        log::info!(
            target: LOG_TARGET,
            "Enriched '{key}' from {attempted} source(s) in {:.2?}, failed: {}",
            outcome.duration(),
            failed.join(", ")
        );
    }
}
