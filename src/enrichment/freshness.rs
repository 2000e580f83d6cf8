//! Deciding which sources must be recollected for a key.

use super::{Key, SourceName, TimestampStore};
use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::app_err;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::IntoEnumIterator;

const LOG_TARGET: &str = "freshness";

/// Maximum data age per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessPolicy {
    max_ages: BTreeMap<SourceName, Duration>,
}

impl FreshnessPolicy {
    #[must_use]
    pub fn new(max_ages: impl IntoIterator<Item = (SourceName, Duration)>) -> Self {
        Self {
            max_ages: max_ages.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn max_age(&self, source: SourceName) -> Option<Duration> {
        self.max_ages.get(&source).copied()
    }

    /// Check that every one of `sources` has a max age.
    pub fn ensure_covers(&self, sources: impl IntoIterator<Item = SourceName>) -> Result<()> {
        let missing: Vec<_> = sources
            .into_iter()
            .filter(|source| !self.max_ages.contains_key(source))
            .map(SourceName::name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(app_err!("freshness policy has no max age for source(s): {}", missing.join(", ")))
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(SourceName::iter().map(|source| (source, source.default_max_age())))
    }
}

/// Why a source is, or is not, due for collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// Collected recently enough.
    Fresh,
    /// No collection has ever been recorded for this key.
    NeverCollected,
    /// The last collection is older than the source's max age.
    Expired,
    /// The last collection only produced a low-confidence estimate.
    Estimate,
    /// The caller asked for a refresh.
    Forced,
    /// The timestamp store could not be read.
    Unknown,
}

impl Staleness {
    #[must_use]
    pub const fn needs_collection(self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

/// Per-source collection decision for one enrichment call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessDecision {
    sources: BTreeMap<SourceName, Staleness>,
}

impl FreshnessDecision {
    #[must_use]
    pub fn staleness(&self, source: SourceName) -> Option<Staleness> {
        self.sources.get(&source).copied()
    }

    #[must_use]
    pub fn needs_collection(&self, source: SourceName) -> bool {
        self.staleness(source).is_some_and(Staleness::needs_collection)
    }

    /// Sources due for collection, in source order.
    pub fn stale_sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.sources
            .iter()
            .filter(|(_, staleness)| staleness.needs_collection())
            .map(|(source, _)| *source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceName, Staleness)> + '_ {
        self.sources.iter().map(|(source, staleness)| (*source, *staleness))
    }
}

impl FromIterator<(SourceName, Staleness)> for FreshnessDecision {
    fn from_iter<I: IntoIterator<Item = (SourceName, Staleness)>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().collect(),
        }
    }
}

/// A decision plus the warning raised when the oracle had to fail open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessReport {
    pub decision: FreshnessDecision,
    pub degraded: Option<String>,
}

/// How long the timestamp store may take to answer one decision unless configured otherwise.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides which sources are stale for a key, from persisted timestamps and the freshness policy.
#[derive(Clone)]
pub struct FreshnessOracle {
    store: Arc<dyn TimestampStore>,
    policy: FreshnessPolicy,
    store_timeout: Duration,
}

impl core::fmt::Debug for FreshnessOracle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FreshnessOracle")
            .field("store", &"<dyn TimestampStore>")
            .field("policy", &self.policy)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl FreshnessOracle {
    #[must_use]
    pub fn new(store: Arc<dyn TimestampStore>, policy: FreshnessPolicy) -> Self {
        Self {
            store,
            policy,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound the time spent reading the timestamp store for one decision.
    #[must_use]
    pub const fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Decide, for each of `sources`, whether it must be collected now.
    ///
    /// A forced refresh marks everything stale without touching the timestamp store. If the
    /// store fails, or does not answer within the store timeout, every source is treated as
    /// stale and the report carries a warning instead of an error.
    pub async fn decide(
        &self,
        key: &Key,
        sources: impl IntoIterator<Item = SourceName>,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> FreshnessReport {
        let sources: Vec<_> = sources.into_iter().collect();

        if force_refresh {
            return FreshnessReport {
                decision: sources.into_iter().map(|source| (source, Staleness::Forced)).collect(),
                degraded: None,
            };
        }

        let cause = match tokio::time::timeout(self.store_timeout, self.decide_all(key, &sources, now)).await {
            Ok(Ok(decision)) => {
                return FreshnessReport {
                    decision,
                    degraded: None,
                };
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("no answer within {:?}", self.store_timeout),
        };

        let warning = format!("timestamp store unavailable for '{key}' ({cause}); collecting every source");
        log::warn!(target: LOG_TARGET, "{warning}");
        FreshnessReport {
            decision: sources.into_iter().map(|source| (source, Staleness::Unknown)).collect(),
            degraded: Some(warning),
        }
    }

    async fn decide_all(&self, key: &Key, sources: &[SourceName], now: DateTime<Utc>) -> Result<FreshnessDecision> {
        let mut decision = BTreeMap::new();
        for &source in sources {
            _ = decision.insert(source, self.decide_source(key, source, now).await?);
        }

        Ok(FreshnessDecision { sources: decision })
    }

    async fn decide_source(&self, key: &Key, source: SourceName, now: DateTime<Utc>) -> Result<Staleness> {
        let Some(stamp) = self.store.last_collected(key, source).await? else {
            return Ok(Staleness::NeverCollected);
        };

        if stamp.is_estimate && source.retries_estimates() {
            return Ok(Staleness::Estimate);
        }

        // A timestamp in the future means clock skew between writers; treat it as fresh
        let Ok(age) = now.signed_duration_since(stamp.collected_at).to_std() else {
            log::debug!(target: LOG_TARGET, "Timestamp for '{key}'/{source} is in the future, treating as fresh");
            return Ok(Staleness::Fresh);
        };

        let max_age = self.policy.max_age(source).unwrap_or(Duration::ZERO);
        if age > max_age {
            Ok(Staleness::Expired)
        } else {
            Ok(Staleness::Fresh)
        }
    }
}
