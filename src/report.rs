//! Error-reporting channel for discovery scans.
//!
//! Scans never raise page or coordinate failures to their consumer. They
//! hand them to an [`ErrorReporter`] and keep going, so a scan's output is
//! independent of any single failed fetch.

use std::sync::{Mutex, MutexGuard};

use crate::error::ScrapeError;

/// Receives scrape failures. Called from inside a scan.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: ScrapeError);
}

/// Logs every error at `warn` and drops it.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: ScrapeError) {
        tracing::warn!(error = %error, "scrape error");
    }
}

/// Keeps errors in memory so a job can summarize them after the scan.
#[derive(Default)]
pub struct CollectingReporter {
    errors: Mutex<Vec<ScrapeError>>,
    log: bool,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log each error at `warn` as it arrives.
    pub fn logging() -> Self {
        Self {
            errors: Mutex::default(),
            log: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ScrapeError>> {
        self.errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered messages of everything collected so far.
    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.to_string()).collect()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<ScrapeError> {
        std::mem::take(&mut *self.lock())
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: ScrapeError) {
        if self.log {
            tracing::warn!(error = %error, "scrape error");
        }
        self.lock().push(error);
    }
}
