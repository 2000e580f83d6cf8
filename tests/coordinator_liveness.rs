//! Integration tests showing that a crashed or cancelled collection never leaves a key stuck

mod support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isbn_enrich::Result;
use isbn_enrich::config::Config;
use isbn_enrich::enrichment::{
    CollectionStamp, EnrichOptions, Key, MemoryTimestampStore, OutcomeError, SourceName, TimestampStore,
};
use std::sync::Arc;
use support::{Behavior, Collectors, ISBN, ScriptedCollector, coordinator, wait_until};
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_panicking_collector_only_fails_its_own_source() {
    let collectors = Collectors::new()
        .with(ScriptedCollector::new(SourceName::Metadata, Behavior::Succeed(1)))
        .with(ScriptedCollector::new(SourceName::Amazon, Behavior::Panic));
    let coordinator = coordinator(&Config::default(), &collectors, Arc::new(MemoryTimestampStore::new()));

    let outcome = coordinator.enrich(ISBN, EnrichOptions::default()).await.unwrap();

    assert!(outcome.success());
    assert!(outcome.is_partial_failure());
    let amazon = outcome.source(SourceName::Amazon).unwrap();
    assert!(amazon.attempted && !amazon.succeeded);
    assert!(amazon.error.as_deref().unwrap().contains("panicked"));
    assert!(!coordinator.is_in_flight(&Key::new(ISBN)));

    // The key is immediately eligible for a fresh collection
    _ = coordinator.enrich(ISBN, EnrichOptions::forced()).await.unwrap();
    assert_eq!(collectors.get(SourceName::Amazon).calls(), 2);
}

/// A store that waits for the gate and then panics, crashing the collection itself.
#[derive(Debug)]
struct CrashingStore {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TimestampStore for CrashingStore {
    async fn last_collected(&self, _key: &Key, _source: SourceName) -> Result<Option<CollectionStamp>> {
        let permit = self.gate.acquire().await;
        drop(permit);
        panic!("timestamp store corrupted");
    }

    async fn mark_collected(&self, _key: &Key, _source: SourceName, _at: DateTime<Utc>, _is_estimate: bool) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_crashed_leader_releases_its_key_and_wakes_followers() {
    let gate = Arc::new(Semaphore::new(0));
    let collectors = Collectors::new().with(ScriptedCollector::new(SourceName::Metadata, Behavior::Succeed(1)));
    let coordinator = coordinator(
        &Config::default(),
        &collectors,
        Arc::new(CrashingStore {
            gate: Arc::clone(&gate),
        }),
    );

    let leader = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.enrich(ISBN, EnrichOptions::default()).await })
    };
    wait_until(|| coordinator.is_in_flight(&Key::new(ISBN))).await;

    let follower = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.enrich(ISBN, EnrichOptions::default()).await })
    };
    wait_until(|| coordinator.stats().waiters == 1).await;

    gate.add_permits(1);

    assert!(leader.await.unwrap_err().is_panic());

    let outcome = follower.await.unwrap().unwrap();
    assert!(!outcome.success());
    assert_eq!(outcome.error(), Some(&OutcomeError::Aborted));

    assert!(!coordinator.is_in_flight(&Key::new(ISBN)));
    assert_eq!(coordinator.stats().waiters, 0);
    assert_eq!(collectors.total_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_leader_releases_its_key() {
    let collectors = Collectors::new()
        .with(ScriptedCollector::new(SourceName::Metadata, Behavior::Hang))
        .with(ScriptedCollector::new(SourceName::Zvab, Behavior::Hang));
    let coordinator = coordinator(&Config::default(), &collectors, Arc::new(MemoryTimestampStore::new()));

    let leader = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.enrich(ISBN, EnrichOptions::default()).await })
    };
    wait_until(|| collectors.total_calls() == 2).await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    assert!(!coordinator.is_in_flight(&Key::new(ISBN)));

    // The aborted outcome stays cached for observers
    let stats = coordinator.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.cached, 1);
    for source in [SourceName::Metadata, SourceName::Zvab] {
        let counts = &stats.sources[&source];
        assert_eq!(counts.attempted, 1);
        assert_eq!(counts.succeeded, 0);
        assert_eq!(counts.failed, 1);
    }
}

#[tokio::test]
async fn test_cancelled_leader_is_followed_by_a_fresh_collection() {
    let gate = Arc::new(Semaphore::new(0));
    let collectors = Collectors::new().with(ScriptedCollector::new(SourceName::Metadata, Behavior::Succeed(3)).gated(&gate));
    let coordinator = coordinator(&Config::default(), &collectors, Arc::new(MemoryTimestampStore::new()));

    let leader = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.enrich(ISBN, EnrichOptions::default()).await })
    };
    wait_until(|| collectors.total_calls() == 1).await;

    leader.abort();
    _ = leader.await;
    assert!(!coordinator.is_in_flight(&Key::new(ISBN)));

    gate.add_permits(1);
    let outcome = coordinator.enrich(ISBN, EnrichOptions::default()).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.source(SourceName::Metadata).unwrap().item_count, 3);
    assert_eq!(collectors.total_calls(), 2);
}
