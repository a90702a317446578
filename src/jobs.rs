//! Periodic jobs: discover, refresh, and drain.
//!
//! Each job is a thin loop over the scraper and the queue:
//!
//! - **discover**: incremental discovery since the stored checkpoint,
//!   enqueue every hit, then advance the checkpoint to the newest release
//!   seen.
//! - **refresh**: metadata diff over the indexed-package store, enqueue
//!   every version the store does not know yet. Coordinates whose metadata
//!   fetch keeps failing are backed off.
//! - **drain**: claim requests one at a time and hand them to a
//!   [`PackageIndexer`], with failing requests backed off.
//!
//! Refresh and drain each take their own [`BackoffProvider`].
//!
//! A failed indexing attempt never aborts a drain; it is recorded on the
//! request and the batch moves on.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::SqlitePool;

use kmp_indexer_core::models::{MavenArtifact, ScraperSource, MAX_FAILED_ATTEMPTS};
use kmp_indexer_core::queue::{Claim, IndexingQueue};

use crate::backoff::BackoffProvider;
use crate::error::ScrapeError;
use crate::indexer::PackageIndexer;
use crate::report::CollectingReporter;
use crate::scraper::ArtifactScraper;

/// Result of one discover run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverOutcome {
    pub since: Option<DateTime<Utc>>,
    pub discovered: u64,
    pub enqueued: u64,
    pub errors: usize,
    /// Checkpoint after the run.
    pub checkpoint: Option<DateTime<Utc>>,
}

/// Result of one refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Coordinates scanned in this run.
    pub coordinates: usize,
    /// Coordinates skipped because they are backed off.
    pub backed_off: usize,
    pub discovered: u64,
    pub enqueued: u64,
    pub errors: usize,
}

/// Result of one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub indexed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub backed_off: u64,
    pub removed: u64,
}

fn checkpoint_key(source: ScraperSource) -> String {
    format!("discover:{}", source)
}

/// Stored discovery checkpoint for `source`.
pub async fn get_checkpoint(
    pool: &SqlitePool,
    source: ScraperSource,
) -> Result<Option<DateTime<Utc>>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(checkpoint_key(source))
            .fetch_optional(pool)
            .await?;

    Ok(result
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis))
}

pub async fn set_checkpoint(
    pool: &SqlitePool,
    source: ScraperSource,
    cursor: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(checkpoint_key(source))
    .bind(cursor.timestamp_millis().to_string())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

async fn enqueue_all(
    queue: &dyn IndexingQueue,
    mut artifacts: BoxStream<'_, MavenArtifact>,
    mut on_artifact: impl FnMut(&MavenArtifact),
) -> Result<(u64, u64)> {
    let mut discovered = 0;
    let mut enqueued = 0;
    while let Some(artifact) = artifacts.next().await {
        discovered += 1;
        on_artifact(&artifact);
        if queue.enqueue(&artifact, false).await? {
            tracing::debug!(%artifact, "enqueued");
            enqueued += 1;
        }
    }
    Ok((discovered, enqueued))
}

/// Discover new KMP artifacts and queue them.
///
/// `since` overrides the stored checkpoint. The checkpoint only advances
/// when the scan finished without page errors; a failed page may hold
/// records older than the newest one seen, and they must be scanned again.
pub async fn run_discover(
    pool: &SqlitePool,
    queue: &dyn IndexingQueue,
    scraper: &ArtifactScraper,
    source: ScraperSource,
    since: Option<DateTime<Utc>>,
) -> Result<DiscoverOutcome> {
    let stored = get_checkpoint(pool, source).await?;
    let since = since.or(stored);
    tracing::info!(%source, since = ?since, "discover started");

    let reporter = Arc::new(CollectingReporter::logging());
    let scraper = scraper.clone().with_reporter(reporter.clone());
    let mut newest = stored;

    let stream = scraper.find_new_artifacts(since);
    let (discovered, enqueued) = enqueue_all(queue, stream, |artifact| {
        if artifact.released_at > newest {
            newest = artifact.released_at;
        }
    })
    .await?;

    let errors = reporter.len();
    let mut checkpoint = stored;
    if errors == 0 {
        if let Some(newest) = newest.filter(|n| Some(*n) != stored) {
            set_checkpoint(pool, source, newest).await?;
            checkpoint = Some(newest);
        }
    } else {
        tracing::warn!(errors, "discover had page errors, checkpoint not advanced");
    }

    metrics::counter!("kmp_discovered_total", "job" => "discover").increment(discovered);
    tracing::info!(discovered, enqueued, errors, "discover finished");
    Ok(DiscoverOutcome {
        since,
        discovered,
        enqueued,
        errors,
        checkpoint,
    })
}

/// Queue versions listed in repository metadata that the package store
/// does not know yet.
///
/// Backoff is keyed by the coordinate's id in the package store. A
/// coordinate whose metadata could not be fetched backs off; one that was
/// fetched is reset.
pub async fn run_refresh(
    queue: &dyn IndexingQueue,
    scraper: &ArtifactScraper,
    backoff: &BackoffProvider,
) -> Result<RefreshOutcome> {
    let mut known = queue.known_versions().await?;
    let ids = queue.coordinate_ids().await?;
    let now = Utc::now();

    let total = known.len();
    known.retain(|key, _| {
        let skip = ids.get(key).is_some_and(|id| backoff.is_backed_off(*id, now));
        if skip {
            tracing::debug!(coordinate = %key, "backed off, skipping");
        }
        !skip
    });
    let backed_off = total - known.len();
    let scanned: Vec<String> = known.keys().cloned().collect();
    tracing::info!(coordinates = scanned.len(), backed_off, "refresh started");

    let reporter = Arc::new(CollectingReporter::logging());
    let scraper = scraper.clone().with_reporter(reporter.clone());
    let stream = scraper.find_new_versions(known);
    let (discovered, enqueued) = enqueue_all(queue, stream, |_| {}).await?;

    let errors = reporter.take();
    let failed: HashSet<String> = errors
        .iter()
        .filter_map(|err| match err {
            ScrapeError::Coordinate { coordinate, .. } => Some(coordinate.clone()),
            _ => None,
        })
        .collect();
    for key in &scanned {
        let Some(&id) = ids.get(key) else {
            continue;
        };
        if failed.contains(key) {
            backoff.on_failure(id, now);
        } else {
            backoff.on_success(id);
        }
    }
    backoff.backed_off_count(Utc::now());

    metrics::counter!("kmp_discovered_total", "job" => "refresh").increment(discovered);
    tracing::info!(discovered, enqueued, errors = errors.len(), "refresh finished");
    Ok(RefreshOutcome {
        coordinates: scanned.len(),
        backed_off,
        discovered,
        enqueued,
        errors: errors.len(),
    })
}

/// Settings for one drain run.
#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub worker: String,
    pub lease: chrono::Duration,
    /// Maximum number of indexing attempts in this run.
    pub limit: usize,
}

/// Claim and index up to `options.limit` requests.
///
/// Requests for versions that are already indexed are swept before the
/// first claim and again at the end; only `reindex` requests survive the
/// sweep. Requests whose id is backed off are released untouched and
/// skipped for the rest of the run. Every claimed id is excluded from later claims in
/// the same run, so a served request is not picked again before the
/// closing sweep removes it.
pub async fn run_drain(
    queue: &dyn IndexingQueue,
    indexer: &dyn PackageIndexer,
    backoff: &BackoffProvider,
    options: &DrainOptions,
) -> Result<DrainOutcome> {
    let mut outcome = DrainOutcome {
        removed: queue.remove_already_indexed().await?,
        ..DrainOutcome::default()
    };
    let mut seen: Vec<i64> = Vec::new();
    let mut attempts = 0usize;

    while attempts < options.limit {
        let claim = Claim::new(&options.worker, options.lease).excluding(&seen);
        let Some(request) = queue.claim_next(&claim).await? else {
            break;
        };
        seen.push(request.id);

        let now = Utc::now();
        if backoff.is_backed_off(request.id, now) {
            tracing::debug!(id = request.id, artifact = %request.artifact(), "backed off, skipping");
            queue.release(request.id).await?;
            outcome.backed_off += 1;
            continue;
        }

        attempts += 1;
        match indexer.index(&request).await {
            Ok(()) => {
                if request.reindex {
                    queue.clear_reindex(request.id).await?;
                }
                queue.release(request.id).await?;
                backoff.on_success(request.id);
                outcome.indexed += 1;
            }
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::warn!(
                    id = request.id,
                    artifact = %request.artifact(),
                    error = %message,
                    "indexing failed"
                );
                queue.mark_failed(request.id, &message).await?;
                outcome.failed += 1;
                if request.failed_attempts + 1 >= MAX_FAILED_ATTEMPTS {
                    tracing::warn!(id = request.id, artifact = %request.artifact(), "request abandoned");
                    backoff.forget(request.id);
                    outcome.abandoned += 1;
                } else {
                    backoff.on_failure(request.id, now);
                }
            }
        }
    }

    outcome.removed += queue.remove_already_indexed().await?;
    backoff.backed_off_count(Utc::now());

    let stats = queue.stats().await?;
    metrics::gauge!("kmp_queue_pending").set(stats.pending as f64);
    metrics::gauge!("kmp_queue_abandoned").set(stats.abandoned as f64);
    metrics::counter!("kmp_indexed_total").increment(outcome.indexed);
    metrics::counter!("kmp_index_failures_total").increment(outcome.failed);

    tracing::info!(
        indexed = outcome.indexed,
        failed = outcome.failed,
        backed_off = outcome.backed_off,
        removed = outcome.removed,
        "drain finished"
    );
    Ok(outcome)
}
