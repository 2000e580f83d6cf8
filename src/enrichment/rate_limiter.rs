use super::ResourceName;
use core::time::Duration;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

const LOG_TARGET: &str = "rate_limit";

/// Upper bound on how long a waiter sleeps before re-checking the bucket.
const MAX_RECHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Token bucket guarding one external resource.
///
/// Refill is lazy: tokens are recomputed from the elapsed time whenever [`RateLimiter::acquire`]
/// looks at the bucket, so there is no background timer. Waiters are not served in FIFO order;
/// under contention whichever waiter re-checks first after a token accrues wins it.
#[derive(Debug)]
pub struct RateLimiter {
    resource: ResourceName,
    rate_per_second: f64,
    burst_capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Bring the token count up to date. `last_refill` moves to `now` whether or not a token is later taken.
    fn refill(&mut self, now: Instant, rate_per_second: f64, burst_capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(rate_per_second, self.tokens).min(burst_capacity);
        self.last_refill = now;
    }
}

/// Point-in-time view of a limiter, for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterSnapshot {
    pub resource: ResourceName,
    pub tokens: f64,
    pub rate_per_second: f64,
    pub burst_capacity: u32,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    ///
    /// A `burst_capacity` below one is raised to one. A rate that is not a positive number
    /// yields a bucket that never refills once its initial burst is spent.
    #[must_use]
    pub fn new(resource: ResourceName, rate_per_second: f64, burst_capacity: u32) -> Self {
        let burst_capacity = f64::from(burst_capacity.max(1));
        let rate_per_second = if rate_per_second.is_finite() { rate_per_second.max(0.0) } else { 0.0 };
        Self {
            resource,
            rate_per_second,
            burst_capacity,
            state: Mutex::new(BucketState {
                tokens: burst_capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    #[must_use]
    pub const fn resource(&self) -> ResourceName {
        self.resource
    }

    /// Wait for a token, giving up after `timeout`.
    ///
    /// Returns `true` once a token has been taken. Returns `false` if none became available in
    /// time, in which case nothing was consumed.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            let wait = match self.try_take(now) {
                Ok(()) => return true,
                Err(until_next_token) => until_next_token,
            };

            let remaining = deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                log::warn!(target: LOG_TARGET, "Timed out after {timeout:?} waiting for a '{}' token", self.resource);
                return false;
            }

            tokio::time::sleep(wait.min(MAX_RECHECK_INTERVAL).min(remaining)).await;
        }
    }

    /// Take a token if one is available, otherwise report how long until the next one accrues.
    fn try_take(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(now, self.rate_per_second, self.burst_capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - state.tokens;
        drop(state);

        // A wait too long to represent (tiny or zero rate) just means re-check later.
        // Never report a zero wait, or a waiter would spin when the deficit is tiny
        let wait = Duration::try_from_secs_f64(deficit / self.rate_per_second).unwrap_or(MAX_RECHECK_INTERVAL);
        Err(wait.max(Duration::from_millis(1)))
    }

    #[must_use]
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(Instant::now(), self.rate_per_second, self.burst_capacity);
        let tokens = state.tokens;
        drop(state);

        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "capacity was built from a u32")]
        let burst_capacity = self.burst_capacity as u32;

        RateLimiterSnapshot {
            resource: self.resource,
            tokens,
            rate_per_second: self.rate_per_second,
            burst_capacity,
        }
    }
}

/// One independent limiter per external resource.
///
/// Limiters share no state and are never nested under a common lock.
#[derive(Debug, Default)]
pub struct RateLimiterSet {
    limiters: BTreeMap<ResourceName, RateLimiter>,
}

impl RateLimiterSet {
    #[must_use]
    pub fn new(limiters: impl IntoIterator<Item = RateLimiter>) -> Self {
        Self {
            limiters: limiters.into_iter().map(|limiter| (limiter.resource(), limiter)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, resource: ResourceName) -> Option<&RateLimiter> {
        self.limiters.get(&resource)
    }

    /// Take one token from each of `resources`, in the resources' fixed order.
    ///
    /// Stops at the first resource that times out and returns it. Tokens already taken from
    /// earlier resources are not returned. Resources with no configured limiter are unlimited.
    pub async fn acquire_all(&self, resources: impl IntoIterator<Item = ResourceName>, timeout: Duration) -> Result<(), ResourceName> {
        let ordered: std::collections::BTreeSet<_> = resources.into_iter().collect();

        for resource in ordered {
            if let Some(limiter) = self.limiters.get(&resource)
                && !limiter.acquire(timeout).await
            {
                return Err(resource);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<RateLimiterSnapshot> {
        self.limiters.values().map(RateLimiter::snapshot).collect()
    }
}
