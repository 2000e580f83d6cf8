//! Coordinated enrichment of book identifiers.
//!
//! [`EnrichmentCoordinator`] is the entry point. It deduplicates concurrent requests for the
//! same [`Key`], takes tokens from a [`RateLimiterSet`] before any external call, asks the
//! [`FreshnessOracle`] which sources are stale, runs the matching [`Collector`]s and caches the
//! resulting [`EnrichmentOutcome`] briefly. A [`DerivedComputation`] hook can be attached to run
//! best-effort follow-up work after a successful collection.

mod collector;
mod coordinator;
mod error;
mod freshness;
mod hook;
mod key;
mod outcome;
mod rate_limiter;
mod result_cache;
mod source_name;
mod source_tracker;
mod timestamp_store;

pub use collector::{CollectReport, Collector, CollectorRegistry};
pub use coordinator::{CoordinatorStats, EnrichOptions, EnrichmentCoordinator, Normalizer};
pub use error::{EnrichError, OutcomeError};
pub use freshness::{FreshnessDecision, FreshnessOracle, FreshnessPolicy, FreshnessReport, Staleness};
pub use hook::{DerivedComputation, HookOptions, HookStats, HookWorker};
pub use key::Key;
pub use outcome::{EnrichmentOutcome, SourceOutcome};
pub use rate_limiter::{RateLimiter, RateLimiterSet, RateLimiterSnapshot};
pub use result_cache::ResultCache;
pub use source_name::{ResourceName, SourceName};
pub use source_tracker::{SourceCounts, SourceTracker};
pub use timestamp_store::{CollectionStamp, MemoryTimestampStore, TimestampStore};
