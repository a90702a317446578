//! In-memory [`IndexingQueue`] implementation for tests and single-process runs.
//!
//! All state sits behind one `std::sync::Mutex`, so every operation is
//! atomic with respect to the others and claims can never overlap.

use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    BanRecord, IndexingRequest, MavenArtifact, QueueStats, MAX_FAILED_ATTEMPTS,
};

use super::{Claim, CoordinateIds, IndexingQueue, KnownVersions};

struct Entry {
    request: IndexingRequest,
    claimed_by: Option<String>,
    claimed_until: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }

    fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_until = None;
    }
}

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<Entry>,
    bans: Vec<BanRecord>,
    packages: HashSet<(String, String, String)>,
    coordinate_ids: HashMap<String, i64>,
}

impl State {
    fn is_banned(&self, request: &IndexingRequest) -> bool {
        self.bans
            .iter()
            .any(|ban| ban.matches(&request.group_id, &request.artifact_id))
    }
}

/// In-memory queue.
pub struct InMemoryQueue {
    state: Mutex<State>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of a request by id, claimed or not.
    pub fn get(&self, id: i64) -> Option<IndexingRequest> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.request.id == id)
            .map(|e| e.request.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest release first, unknown release dates before everything, then
/// insertion order.
fn selection_order(a: &IndexingRequest, b: &IndexingRequest) -> Ordering {
    let key = |r: &IndexingRequest| (r.released_at.is_some(), Reverse(r.released_at), r.id);
    key(a).cmp(&key(b))
}

#[async_trait]
impl IndexingQueue for InMemoryQueue {
    async fn enqueue(&self, artifact: &MavenArtifact, reindex: bool) -> Result<bool> {
        let mut state = self.lock();
        let exists = state.entries.iter().any(|e| {
            e.request.group_id == artifact.group_id
                && e.request.artifact_id == artifact.artifact_id
                && e.request.version == artifact.version
        });
        if exists {
            return Ok(false);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(Entry {
            request: IndexingRequest {
                id,
                group_id: artifact.group_id.clone(),
                artifact_id: artifact.artifact_id.clone(),
                version: artifact.version.clone(),
                released_at: artifact.released_at,
                scraper_source: artifact.scraper_source,
                reindex,
                failed_attempts: 0,
                failed_at: None,
                last_error_message: None,
            },
            claimed_by: None,
            claimed_until: None,
        });
        Ok(true)
    }

    async fn claim_next(&self, claim: &Claim<'_>) -> Result<Option<IndexingRequest>> {
        let mut state = self.lock();
        let best = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.request.failed_attempts < MAX_FAILED_ATTEMPTS)
            .filter(|(_, e)| !e.is_claimed(claim.now))
            .filter(|(_, e)| !claim.exclude.contains(&e.request.id))
            .filter(|(_, e)| !state.is_banned(&e.request))
            .min_by(|(_, a), (_, b)| selection_order(&a.request, &b.request))
            .map(|(idx, _)| idx);

        Ok(best.map(|idx| {
            let entry = &mut state.entries[idx];
            entry.claimed_by = Some(claim.worker.to_string());
            entry.claimed_until = Some(claim.expires_at());
            entry.request.clone()
        }))
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.request.id == id) {
            entry.request.failed_attempts += 1;
            entry.request.failed_at = Some(Utc::now());
            entry.request.last_error_message = Some(error_message.to_string());
            entry.clear_claim();
        }
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.request.id == id) {
            entry.clear_claim();
        }
        Ok(())
    }

    async fn clear_reindex(&self, id: i64) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.request.id == id) {
            entry.request.reindex = false;
        }
        Ok(())
    }

    async fn remove_already_indexed(&self) -> Result<u64> {
        let mut state = self.lock();
        let State {
            entries, packages, ..
        } = &mut *state;
        let before = entries.len();
        entries.retain(|e| {
            let r = &e.request;
            r.reindex
                || !packages.contains(&(
                    r.group_id.clone(),
                    r.artifact_id.clone(),
                    r.version.clone(),
                ))
        });
        Ok((before - entries.len()) as u64)
    }

    async fn ban(&self, ban: &BanRecord) -> Result<()> {
        let mut state = self.lock();
        if !state.bans.contains(ban) {
            state.bans.push(ban.clone());
        }
        Ok(())
    }

    async fn record_indexed(&self, artifact: &MavenArtifact) -> Result<()> {
        let mut state = self.lock();
        state.packages.insert((
            artifact.group_id.clone(),
            artifact.artifact_id.clone(),
            artifact.version.clone(),
        ));
        let next = state.coordinate_ids.len() as i64 + 1;
        state
            .coordinate_ids
            .entry(artifact.coordinate().to_string())
            .or_insert(next);
        Ok(())
    }

    async fn known_versions(&self) -> Result<KnownVersions> {
        let state = self.lock();
        let mut known = KnownVersions::new();
        for (group_id, artifact_id, version) in &state.packages {
            known
                .entry(format!("{}:{}", group_id, artifact_id))
                .or_default()
                .insert(version.clone());
        }
        Ok(known)
    }

    async fn coordinate_ids(&self) -> Result<CoordinateIds> {
        Ok(self.lock().coordinate_ids.clone())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.lock();
        let now = Utc::now();
        let mut stats = QueueStats::default();
        for entry in &state.entries {
            if entry.request.failed_attempts >= MAX_FAILED_ATTEMPTS {
                stats.abandoned += 1;
            } else {
                stats.pending += 1;
                if entry.is_claimed(now) {
                    stats.claimed += 1;
                }
            }
        }
        Ok(stats)
    }
}
