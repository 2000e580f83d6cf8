//! Test doubles shared by the coordinator integration tests

#![allow(dead_code, reason = "each test binary uses a different subset of the helpers")]

use async_trait::async_trait;
use chrono::Utc;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use isbn_enrich::Result;
use isbn_enrich::config::Config;
use isbn_enrich::enrichment::{
    CollectReport, Collector, CollectorRegistry, DerivedComputation, EnrichmentCoordinator, EnrichmentOutcome, Key,
    MemoryTimestampStore, SourceName, TimestampStore,
};
use ohno::bail;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A valid ISBN-13, already in canonical form.
pub const ISBN: &str = "9780399127212";

/// What a [`ScriptedCollector`] does when invoked.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed(u64),
    Fail,
    /// Report failure after collecting some items.
    FailAfter(u64),
    Error,
    Panic,
    Hang,
}

/// A collector whose result is fixed up front and which counts its invocations.
#[derive(Debug)]
pub struct ScriptedCollector {
    source: SourceName,
    behavior: Behavior,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    key_gates: Vec<(Key, Arc<Semaphore>)>,
    stamps: Option<Arc<MemoryTimestampStore>>,
    calls: AtomicUsize,
}

impl ScriptedCollector {
    pub fn new(source: SourceName, behavior: Behavior) -> Self {
        Self {
            source,
            behavior,
            delay: Duration::ZERO,
            gate: None,
            key_gates: Vec::new(),
            stamps: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before producing the result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block until the gate has a permit. Once a permit is added the gate stays open.
    pub fn gated(mut self, gate: &Arc<Semaphore>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    /// Like [`Self::gated`], but only for calls collecting `isbn`.
    pub fn gated_on(mut self, isbn: &str, gate: &Arc<Semaphore>) -> Self {
        self.key_gates.push((Key::new(isbn), Arc::clone(gate)));
        self
    }

    /// Record a collection stamp on success, as a real collector does.
    pub fn stamping(mut self, store: &Arc<MemoryTimestampStore>) -> Self {
        self.stamps = Some(Arc::clone(store));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn collect(&self, key: &Key) -> Result<CollectReport> {
        _ = self.calls.fetch_add(1, Ordering::SeqCst);

        let key_gate = self.key_gates.iter().find(|(gated, _)| gated == key).map(|(_, gate)| gate);
        if let Some(gate) = key_gate.or(self.gate.as_ref()) {
            let permit = gate.acquire().await;
            drop(permit);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior {
            Behavior::Succeed(items) => {
                if let Some(stamps) = &self.stamps {
                    stamps.mark_collected(key, self.source, Utc::now(), false).await?;
                }
                Ok(CollectReport::collected(items))
            }
            Behavior::Fail => Ok(CollectReport::failed()),
            Behavior::FailAfter(items) => Ok(CollectReport {
                item_count: items,
                success: false,
            }),
            Behavior::Error => bail!("upstream returned 503 for {}", self.source),
            Behavior::Panic => panic!("collector for {} crashed", self.source),
            Behavior::Hang => core::future::pending().await,
        }
    }
}

/// A set of scripted collectors, kept around so tests can inspect their call counts.
#[derive(Debug, Default)]
pub struct Collectors {
    scripted: Vec<(SourceName, Arc<ScriptedCollector>)>,
}

impl Collectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collector: ScriptedCollector) -> Self {
        self.scripted.push((collector.source, Arc::new(collector)));
        self
    }

    pub fn get(&self, source: SourceName) -> &ScriptedCollector {
        self.scripted
            .iter()
            .find(|(s, _)| *s == source)
            .map(|(_, collector)| collector.as_ref())
            .unwrap()
    }

    pub fn total_calls(&self) -> usize {
        self.scripted.iter().map(|(_, collector)| collector.calls()).sum()
    }

    pub fn registry(&self) -> CollectorRegistry {
        self.scripted.iter().fold(CollectorRegistry::new(), |registry, (source, collector)| {
            registry.with(*source, Arc::clone(collector) as Arc<dyn Collector>)
        })
    }
}

/// A hook that counts its invocations and optionally fails every time.
#[derive(Debug, Default)]
pub struct RecordingHook {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DerivedComputation for RecordingHook {
    async fn on_enriched(&self, _key: &Key, _outcome: Arc<EnrichmentOutcome>) -> Result<()> {
        _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("price model unavailable");
        }
        Ok(())
    }
}

pub fn coordinator(config: &Config, collectors: &Collectors, store: Arc<dyn TimestampStore>) -> Arc<EnrichmentCoordinator> {
    Arc::new(EnrichmentCoordinator::new(config, collectors.registry(), store, None).unwrap())
}

/// Poll `condition` until it holds, failing the test after a generous bound.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was never met");
}
