//! Indexing request queue abstraction.
//!
//! The [`IndexingQueue`] trait defines every queue operation the jobs need,
//! so the SQLite backend and the in-memory backend are interchangeable.
//!
//! # Claiming
//!
//! [`claim_next`](IndexingQueue::claim_next) is the "select for update, skip
//! locked, limit 1" operation. A claimed row carries a lease; until the
//! lease expires (or the row is released, failed, or removed) no other
//! worker can see it. Contention is never a wait: a worker that finds
//! nothing unclaimed simply gets `None`.
//!
//! # Lifecycle
//!
//! ```text
//! enqueue ──▶ PENDING(0) ──fail──▶ PENDING(1) ──fail──▶ ABANDONED(2)
//!                │                     │
//!                └──── indexed ────────┴──▶ removed by remove_already_indexed
//! ```
//!
//! Abandoned requests stay in the queue; nothing purges them.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::{BanRecord, IndexingRequest, MavenArtifact, QueueStats};

/// Parameters of a single claim attempt.
#[derive(Debug, Clone)]
pub struct Claim<'a> {
    /// Identifier of the claiming worker, stored on the row.
    pub worker: &'a str,
    /// How long the claim stays exclusive without being released.
    pub lease: Duration,
    /// Clock value used for lease bookkeeping.
    pub now: DateTime<Utc>,
    /// Request ids the caller does not want this time.
    pub exclude: &'a [i64],
}

impl<'a> Claim<'a> {
    pub fn new(worker: &'a str, lease: Duration) -> Self {
        Self {
            worker,
            lease,
            now: Utc::now(),
            exclude: &[],
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn excluding(mut self, ids: &'a [i64]) -> Self {
        self.exclude = ids;
        self
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.now + self.lease
    }
}

/// Known versions per `groupId:artifactId` key.
pub type KnownVersions = HashMap<String, HashSet<String>>;

/// Stable numeric id per `groupId:artifactId` in the indexed-package store.
pub type CoordinateIds = HashMap<String, i64>;

/// Persisted work queue of "please index this artifact" requests.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`enqueue`](IndexingQueue::enqueue) | Add a request unless the triple is already queued |
/// | [`claim_next`](IndexingQueue::claim_next) | Select and lock the next request |
/// | [`mark_failed`](IndexingQueue::mark_failed) | Record a failed attempt and release |
/// | [`release`](IndexingQueue::release) | Drop a claim without recording failure |
/// | [`clear_reindex`](IndexingQueue::clear_reindex) | Mark a reindex request as satisfied |
/// | [`remove_already_indexed`](IndexingQueue::remove_already_indexed) | Garbage-collect satisfied requests |
/// | [`ban`](IndexingQueue::ban) | Exclude a group or artifact from selection |
/// | [`record_indexed`](IndexingQueue::record_indexed) | Write the indexed-package store |
/// | [`known_versions`](IndexingQueue::known_versions) | Indexed versions per coordinate |
/// | [`coordinate_ids`](IndexingQueue::coordinate_ids) | Stable id per indexed coordinate |
/// | [`stats`](IndexingQueue::stats) | Pending / abandoned / claimed counts |
#[async_trait]
pub trait IndexingQueue: Send + Sync {
    /// Queue an artifact. Returns `false` if the (group, artifact, version)
    /// triple was already queued.
    async fn enqueue(&self, artifact: &MavenArtifact, reindex: bool) -> Result<bool>;

    /// Claim the best selectable request.
    ///
    /// Selectable means: fewer than two failed attempts, not banned by group
    /// or by (group, artifact), not held under an unexpired claim, and not in
    /// `claim.exclude`. Among those, the newest `released_at` wins, with
    /// unknown release dates first.
    async fn claim_next(&self, claim: &Claim<'_>) -> Result<Option<IndexingRequest>>;

    /// Increment `failed_attempts`, stamp `failed_at`, store the message,
    /// and release the claim.
    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()>;

    /// Release a claim without touching the failure counters.
    async fn release(&self, id: i64) -> Result<()>;

    /// Reset the `reindex` flag once a reindex request has been served, so
    /// the next [`remove_already_indexed`](IndexingQueue::remove_already_indexed)
    /// sweep can drop it.
    async fn clear_reindex(&self, id: i64) -> Result<()>;

    /// Delete non-reindex requests whose triple is already indexed.
    async fn remove_already_indexed(&self) -> Result<u64>;

    /// Add a ban record. Adding the same ban twice is a no-op.
    async fn ban(&self, ban: &BanRecord) -> Result<()>;

    /// Record that an artifact version has been indexed.
    async fn record_indexed(&self, artifact: &MavenArtifact) -> Result<()>;

    /// Indexed versions grouped by `groupId:artifactId`.
    async fn known_versions(&self) -> Result<KnownVersions>;

    /// One id per coordinate in the indexed-package store, keyed like
    /// [`known_versions`](IndexingQueue::known_versions). An id never
    /// changes once assigned.
    async fn coordinate_ids(&self) -> Result<CoordinateIds>;

    /// Count requests by lifecycle state.
    async fn stats(&self) -> Result<QueueStats>;
}
