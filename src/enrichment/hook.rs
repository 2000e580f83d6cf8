//! Best-effort downstream work triggered by a successful enrichment.
//!
//! Jobs go through a bounded queue to a small pool of worker tasks, so a slow or failing hook
//! never holds up an enrichment call. A job that cannot be queued is dropped.

use super::{EnrichmentOutcome, Key};
use crate::Result;
use async_trait::async_trait;
use core::panic::AssertUnwindSafe;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use futures_util::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const LOG_TARGET: &str = "      hook";

/// A computation derived from freshly enriched data, such as re-scoring an item.
#[async_trait]
pub trait DerivedComputation: Send + Sync {
    async fn on_enriched(&self, key: &Key, outcome: Arc<EnrichmentOutcome>) -> Result<()>;
}

/// How the hook workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            max_retries: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Counters describing what happened to submitted jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HookStats {
    pub submitted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct HookCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug)]
struct HookJob {
    key: Key,
    outcome: Arc<EnrichmentOutcome>,
}

/// Runs a [`DerivedComputation`] on a pool of background tasks.
///
/// Dropping the worker closes the queue; jobs already queued still run.
#[derive(Debug)]
pub struct HookWorker {
    sender: mpsc::Sender<HookJob>,
    counters: Arc<HookCounters>,
}

impl HookWorker {
    /// Spawn the worker tasks. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(hook: Arc<dyn DerivedComputation>, options: HookOptions) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(HookCounters::default());

        for _ in 0..options.workers.max(1) {
            let hook = Arc::clone(&hook);
            let receiver = Arc::clone(&receiver);
            let counters = Arc::clone(&counters);

            drop(tokio::spawn(async move {
                loop {
                    // Only one idle worker waits on the queue at a time; the lock is released before the job runs
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };

                    let counter = if run_job(hook.as_ref(), &job, options).await {
                        &counters.completed
                    } else {
                        &counters.failed
                    };
                    _ = counter.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        Self { sender, counters }
    }

    /// Queue a job without waiting. Returns `false` if the job was dropped.
    pub fn submit(&self, key: Key, outcome: Arc<EnrichmentOutcome>) -> bool {
        match self.sender.try_send(HookJob { key, outcome }) {
            Ok(()) => {
                _ = self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job) | TrySendError::Closed(job)) => {
                _ = self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(target: LOG_TARGET, "Hook queue is full, dropping derived computation for '{}'", job.key);
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> HookStats {
        HookStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Run one job with retries. Errors and panics are logged, never propagated.
async fn run_job(hook: &dyn DerivedComputation, job: &HookJob, options: HookOptions) -> bool {
    let attempts = options.max_retries.saturating_add(1);

    for attempt in 1..=attempts {
        let call = AssertUnwindSafe(hook.on_enriched(&job.key, Arc::clone(&job.outcome)));
        match call.catch_unwind().await {
            Ok(Ok(())) => {
                log::debug!(target: LOG_TARGET, "Derived computation for '{}' completed", job.key);
                return true;
            }
            Ok(Err(e)) => {
                log::warn!(target: LOG_TARGET, "Derived computation for '{}' failed (attempt {attempt}/{attempts}): {e:#}", job.key);
            }
            Err(_) => {
                log::warn!(target: LOG_TARGET, "Derived computation for '{}' panicked (attempt {attempt}/{attempts})", job.key);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(options.retry_delay).await;
        }
    }

    false
}
