//! Coordinated, rate-limited enrichment of book identifiers.
//!
//! The [`enrichment`] module holds the coordination core: per-key deduplication of concurrent
//! requests, per-resource token buckets, freshness decisions and a short-lived outcome cache.
//! Collectors, the timestamp store and the derived-computation hook are collaborators supplied
//! by the application through traits. The [`config`] module loads the coordinator's settings.

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod config;
pub mod enrichment;
