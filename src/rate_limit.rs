//! Token bucket gate for outbound search requests.
//!
//! Every search page goes through [`acquire_and_run`], which waits for a
//! token from the shared [`RequestLimiter`] before running the request.
//! Sources that are not rate limited plug in [`Unlimited`] behind the same
//! trait.
//!
//! # Refill model
//!
//! [`TokenBucket`] starts full with `capacity` tokens. Every `refill_period`
//! after construction it gains `refill_amount` tokens, capped at
//! `capacity`. Refills are discrete, so over any run the number of granted
//! acquisitions never exceeds `capacity + floor(elapsed / period) * amount`.
//!
//! Waiters line up on a `tokio::sync::Mutex`, which is FIFO: the caller at
//! the head sleeps until the next refill while holding the lock, and
//! everyone behind it waits their turn. Dropping an `acquire` future
//! removes the caller from the line.

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Shared gate in front of an upstream API.
#[async_trait]
pub trait RequestLimiter: Send + Sync {
    /// Wait until a request may be sent. Never fails.
    async fn acquire(&self);

    /// Remember that a request went through successfully.
    fn record_success(&self);

    /// Tokens available right now; `None` when the limiter does not count.
    fn available_tokens(&self) -> Option<u32>;

    /// Time of the last successful request, if any.
    fn last_success(&self) -> Option<DateTime<Utc>>;
}

/// Acquire a token, run `action`, and record success when it returns `Ok`.
///
/// The action's error is returned unchanged.
pub async fn acquire_and_run<L, F, Fut, T, E>(limiter: &L, action: F) -> Result<T, E>
where
    L: RequestLimiter + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    limiter.acquire().await;
    let result = action().await;
    if result.is_ok() {
        limiter.record_success();
    }
    result
}

/// Build the limiter described by `[rate_limit]`.
pub fn limiter_from_config(config: &RateLimitConfig) -> Arc<dyn RequestLimiter> {
    if config.enabled {
        Arc::new(TokenBucket::new(
            config.capacity,
            config.refill_amount,
            Duration::from_millis(config.refill_period_ms),
        ))
    } else {
        Arc::new(Unlimited::new())
    }
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Fixed-capacity token bucket with discrete periodic refill.
pub struct TokenBucket {
    capacity: u32,
    refill_amount: u32,
    refill_period: Duration,
    state: Mutex<BucketState>,
    available: AtomicU32,
    last_success_ms: AtomicI64,
    total_acquired: AtomicU64,
    total_waited: AtomicU64,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_amount: u32, refill_period: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_amount: refill_amount.max(1),
            refill_period: refill_period.max(Duration::from_millis(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            available: AtomicU32::new(capacity),
            last_success_ms: AtomicI64::new(0),
            total_acquired: AtomicU64::new(0),
            total_waited: AtomicU64::new(0),
        }
    }

    /// Credit every refill period that has fully elapsed.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let periods = elapsed.as_nanos() / self.refill_period.as_nanos();
        if periods == 0 {
            return;
        }
        let added = periods.saturating_mul(self.refill_amount as u128);
        state.tokens = (state.tokens as u128 + added).min(self.capacity as u128) as u32;
        // Keep the refill grid anchored at construction time.
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);
        state.last_refill += self.refill_period.saturating_mul(periods);
    }

    fn publish(&self, tokens: u32) {
        self.available.store(tokens, Ordering::Relaxed);
        metrics::gauge!("kmp_rate_limiter_tokens_available").set(tokens as f64);
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            available_tokens: self.available_tokens().unwrap_or(0),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_waited: self.total_waited.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RequestLimiter for TokenBucket {
    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let mut waited = false;
        loop {
            self.refill(&mut state, Instant::now());
            if state.tokens > 0 {
                state.tokens -= 1;
                self.publish(state.tokens);
                self.total_acquired.fetch_add(1, Ordering::Relaxed);
                if waited {
                    self.total_waited.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
            waited = true;
            let next_refill = state.last_refill + self.refill_period;
            tracing::trace!(
                wait_ms = next_refill
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "rate limiter empty, waiting for refill"
            );
            tokio::time::sleep_until(next_refill).await;
        }
    }

    fn record_success(&self) {
        record_success_at(&self.last_success_ms, Utc::now());
    }

    fn available_tokens(&self) -> Option<u32> {
        // A held lock means a caller is waiting on an empty bucket or about
        // to take a token; the last published value is close enough.
        match self.state.try_lock() {
            Ok(mut state) => {
                self.refill(&mut state, Instant::now());
                Some(state.tokens)
            }
            Err(_) => Some(self.available.load(Ordering::Relaxed)),
        }
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        load_last_success(&self.last_success_ms)
    }
}

/// Limiter that never waits.
#[derive(Default)]
pub struct Unlimited {
    last_success_ms: AtomicI64,
}

impl Unlimited {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestLimiter for Unlimited {
    async fn acquire(&self) {}

    fn record_success(&self) {
        record_success_at(&self.last_success_ms, Utc::now());
    }

    fn available_tokens(&self) -> Option<u32> {
        None
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        load_last_success(&self.last_success_ms)
    }
}

fn record_success_at(slot: &AtomicI64, now: DateTime<Utc>) {
    slot.store(now.timestamp_millis(), Ordering::Relaxed);
    metrics::gauge!("kmp_rate_limiter_last_success_timestamp_seconds").set(now.timestamp() as f64);
}

fn load_last_success(slot: &AtomicI64) -> Option<DateTime<Utc>> {
    match slot.load(Ordering::Relaxed) {
        0 => None,
        ms => DateTime::from_timestamp_millis(ms),
    }
}

/// Counters for a [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStats {
    pub available_tokens: u32,
    pub total_acquired: u64,
    /// Acquisitions that had to wait for a refill.
    pub total_waited: u64,
}
