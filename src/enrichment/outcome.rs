use super::{Key, OutcomeError, SourceName, Staleness};
use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

/// What happened to one source during an enrichment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub attempted: bool,
    pub succeeded: bool,
    pub item_count: u64,
    pub staleness: Staleness,
    pub error: Option<String>,
}

impl SourceOutcome {
    /// The source was fresh and was not collected.
    #[must_use]
    pub const fn skipped(staleness: Staleness) -> Self {
        Self {
            attempted: false,
            succeeded: false,
            item_count: 0,
            staleness,
            error: None,
        }
    }

    #[must_use]
    pub const fn succeeded(staleness: Staleness, item_count: u64) -> Self {
        Self {
            attempted: true,
            succeeded: true,
            item_count,
            staleness,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(staleness: Staleness, item_count: u64, error: impl Into<String>) -> Self {
        Self {
            attempted: true,
            succeeded: false,
            item_count,
            staleness,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.attempted && !self.succeeded
    }
}

/// The aggregated result of one enrichment call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentOutcome {
    key: Key,
    success: bool,
    error: Option<OutcomeError>,
    sources: BTreeMap<SourceName, SourceOutcome>,
    warnings: Vec<String>,
    duration: Duration,
    completed_at: DateTime<Utc>,
}

impl EnrichmentOutcome {
    /// Assemble an outcome.
    ///
    /// The call counts as failed when `error` is set. The metadata source is critical when it
    /// was being collected for the first time: nothing else can supply the item's identity, so
    /// its failure fails the whole call. Every other per-source failure is partial.
    #[must_use]
    pub fn assemble(
        key: Key,
        sources: BTreeMap<SourceName, SourceOutcome>,
        warnings: Vec<String>,
        duration: Duration,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let error = sources
            .get(&SourceName::Metadata)
            .filter(|outcome| outcome.is_failure() && outcome.staleness == Staleness::NeverCollected)
            .map(|_| OutcomeError::CriticalSourceFailed(SourceName::Metadata));

        Self {
            key,
            success: error.is_none(),
            error,
            sources,
            warnings,
            duration,
            completed_at,
        }
    }

    /// An outcome for an attempt that ended before any collector produced a result.
    #[must_use]
    pub const fn aborted(key: Key, error: OutcomeError, duration: Duration, completed_at: DateTime<Utc>) -> Self {
        Self {
            key,
            success: false,
            error: Some(error),
            sources: BTreeMap::new(),
            warnings: Vec::new(),
            duration,
            completed_at,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &Key {
        &self.key
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    #[must_use]
    pub const fn error(&self) -> Option<&OutcomeError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn source(&self, source: SourceName) -> Option<&SourceOutcome> {
        self.sources.get(&source)
    }

    pub fn sources(&self) -> impl Iterator<Item = (SourceName, &SourceOutcome)> {
        self.sources.iter().map(|(source, outcome)| (*source, outcome))
    }

    /// Degraded-mode warnings, such as the freshness oracle failing open.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// The call succeeded overall but at least one source failed.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        self.success && self.sources.values().any(SourceOutcome::is_failure)
    }

    /// At least one source was collected successfully by this call.
    #[must_use]
    pub fn made_progress(&self) -> bool {
        self.sources.values().any(|outcome| outcome.succeeded)
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.sources
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(source, _)| *source)
    }

    pub fn attempted_sources(&self) -> impl Iterator<Item = SourceName> + '_ {
        self.sources.iter().filter(|(_, outcome)| outcome.attempted).map(|(source, _)| *source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(sources: impl IntoIterator<Item = (SourceName, SourceOutcome)>) -> EnrichmentOutcome {
        EnrichmentOutcome::assemble(Key::new("k"), sources.into_iter().collect(), Vec::new(), Duration::ZERO, Utc::now())
    }

    #[test]
    fn test_all_sources_succeeding_is_a_clean_success() {
        let outcome = assemble([
            (SourceName::Metadata, SourceOutcome::succeeded(Staleness::NeverCollected, 1)),
            (SourceName::Amazon, SourceOutcome::succeeded(Staleness::Expired, 3)),
        ]);

        assert!(outcome.success());
        assert!(outcome.error().is_none());
        assert!(!outcome.is_partial_failure());
        assert!(outcome.made_progress());
    }

    #[test]
    fn test_non_critical_failure_is_partial() {
        let outcome = assemble([
            (SourceName::Metadata, SourceOutcome::succeeded(Staleness::NeverCollected, 1)),
            (SourceName::Amazon, SourceOutcome::failed(Staleness::Expired, 0, "503")),
        ]);

        assert!(outcome.success());
        assert!(outcome.is_partial_failure());
        assert_eq!(outcome.failed_sources().collect::<Vec<_>>(), vec![SourceName::Amazon]);
    }

    #[test]
    fn test_first_metadata_failure_is_critical() {
        let outcome = assemble([
            (SourceName::Metadata, SourceOutcome::failed(Staleness::NeverCollected, 0, "boom")),
            (SourceName::Amazon, SourceOutcome::succeeded(Staleness::NeverCollected, 2)),
        ]);

        assert!(!outcome.success());
        assert_eq!(outcome.error(), Some(&OutcomeError::CriticalSourceFailed(SourceName::Metadata)));
        assert!(!outcome.is_partial_failure());
    }

    #[test]
    fn test_metadata_refresh_failure_is_only_partial() {
        for staleness in [Staleness::Expired, Staleness::Forced, Staleness::Unknown] {
            let outcome = assemble([(SourceName::Metadata, SourceOutcome::failed(staleness, 0, "boom"))]);
            assert!(outcome.success(), "{staleness:?}");
            assert!(outcome.is_partial_failure());
        }
    }

    #[test]
    fn test_skipped_sources_are_neither_progress_nor_failure() {
        let outcome = assemble([(SourceName::Metadata, SourceOutcome::skipped(Staleness::Fresh))]);

        assert!(outcome.success());
        assert!(!outcome.made_progress());
        assert!(!outcome.is_partial_failure());
        assert_eq!(outcome.attempted_sources().count(), 0);
    }

    #[test]
    fn test_aborted_outcome_is_marked_failed() {
        let outcome = EnrichmentOutcome::aborted(Key::new("k"), OutcomeError::Aborted, Duration::ZERO, Utc::now());

        assert!(!outcome.success());
        assert_eq!(outcome.error(), Some(&OutcomeError::Aborted));
        assert_eq!(outcome.sources().count(), 0);
    }
}
