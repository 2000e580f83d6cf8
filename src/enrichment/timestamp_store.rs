use super::{Key, SourceName};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// When a source was last collected for a key, and whether that collection was only an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStamp {
    pub collected_at: DateTime<Utc>,
    pub is_estimate: bool,
}

/// Persistence of per-source collection timestamps.
///
/// Collectors write stamps after a successful collection; the freshness oracle only reads them.
/// Implementations must tolerate concurrent reads for many keys.
#[async_trait]
pub trait TimestampStore: Send + Sync {
    async fn last_collected(&self, key: &Key, source: SourceName) -> Result<Option<CollectionStamp>>;

    async fn mark_collected(&self, key: &Key, source: SourceName, collected_at: DateTime<Utc>, is_estimate: bool) -> Result<()>;
}

/// A process-local [`TimestampStore`].
#[derive(Debug, Default)]
pub struct MemoryTimestampStore {
    stamps: Mutex<HashMap<(Key, SourceName), CollectionStamp>>,
}

impl MemoryTimestampStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (key, source) pairs with a stamp.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TimestampStore for MemoryTimestampStore {
    async fn last_collected(&self, key: &Key, source: SourceName) -> Result<Option<CollectionStamp>> {
        let stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stamps.get(&(key.clone(), source)).copied())
    }

    async fn mark_collected(&self, key: &Key, source: SourceName, collected_at: DateTime<Utc>, is_estimate: bool) -> Result<()> {
        let mut stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        _ = stamps.insert((key.clone(), source), CollectionStamp { collected_at, is_estimate });
        Ok(())
    }
}
