use super::{Key, ResourceName, SourceName};
use core::time::Duration;
use serde::Serialize;

/// Reasons an enrichment call produced no outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    /// The identifier could not be normalized.
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    /// Another call is collecting this key and the caller chose not to wait.
    #[error("enrichment of '{0}' is already in progress")]
    AlreadyInProgress(Key),

    /// The caller waited the full ceiling for another call to finish collecting this key.
    #[error("timed out after {waited:?} waiting for enrichment of '{key}'")]
    TimedOut { key: Key, waited: Duration },

    /// The collecting call finished but left no result to share.
    #[error("enrichment of '{0}' finished without publishing a result")]
    StillInProgress(Key),

    /// A rate-limited resource had no token available within the acquire timeout.
    #[error("rate limit for '{resource}' exhausted while enriching '{key}'")]
    RateLimited { key: Key, resource: ResourceName },
}

/// Why a published outcome is marked unsuccessful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeError {
    /// A source that nothing else can stand in for failed.
    #[error("critical source '{0}' failed")]
    CriticalSourceFailed(SourceName),

    /// The attempt was abandoned before any collector ran.
    #[error("rate limit for '{0}' exhausted")]
    RateLimited(ResourceName),

    /// The collecting call panicked or was cancelled before it finished.
    #[error("enrichment was aborted")]
    Aborted,
}
