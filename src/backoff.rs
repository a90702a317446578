//! Per-entity exponential backoff for periodic jobs.
//!
//! Each job owns one [`BackoffProvider`]; providers are never shared
//! between jobs. State lives only in memory and is lost on restart.
//! The delay schedule is
//! [`delay_for_attempt`](kmp_indexer_core::backoff::delay_for_attempt).

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use kmp_indexer_core::backoff::delay_for_attempt;

/// Backoff bookkeeping for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub attempts: u32,
    pub next_allowed_at: DateTime<Utc>,
}

/// Tracks consecutive failures per id and when each id may be retried.
pub struct BackoffProvider {
    job: String,
    states: DashMap<i64, BackoffState>,
}

impl BackoffProvider {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            states: DashMap::new(),
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    /// True iff `id` has failed and its retry time has not come yet.
    pub fn is_backed_off(&self, id: i64, now: DateTime<Utc>) -> bool {
        self.states
            .get(&id)
            .is_some_and(|state| now < state.next_allowed_at)
    }

    /// Record a failure of `id` at `now` and return the new state.
    pub fn on_failure(&self, id: i64, now: DateTime<Utc>) -> BackoffState {
        let state = {
            let mut entry = self.states.entry(id).or_insert(BackoffState {
                attempts: 0,
                next_allowed_at: now,
            });
            entry.attempts = entry.attempts.saturating_add(1);
            entry.next_allowed_at = now + delay_for_attempt(entry.attempts);
            *entry
        };
        tracing::debug!(
            job = %self.job,
            id,
            attempts = state.attempts,
            next_allowed_at = %state.next_allowed_at,
            "backing off"
        );
        self.backed_off_count(now);
        state
    }

    /// Reset `id` after a successful run.
    pub fn on_success(&self, id: i64) {
        self.forget(id);
    }

    /// Drop all state for `id`, e.g. once its work item is abandoned and
    /// will never be retried.
    pub fn forget(&self, id: i64) {
        if self.states.remove(&id).is_some() {
            self.backed_off_count(Utc::now());
        }
    }

    pub fn state(&self, id: i64) -> Option<BackoffState> {
        self.states.get(&id).map(|s| *s)
    }

    /// Number of ids backed off at `now`. Also refreshes the
    /// `kmp_backoff_active` gauge, so windows that ran out stop counting.
    pub fn backed_off_count(&self, now: DateTime<Utc>) -> usize {
        let count = self
            .states
            .iter()
            .filter(|entry| now < entry.next_allowed_at)
            .count();
        metrics::gauge!("kmp_backoff_active", "job" => self.job.clone()).set(count as f64);
        count
    }

    /// Number of ids with any state, backed off or not.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}
