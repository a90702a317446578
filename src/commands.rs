//! CLI command implementations.
//!
//! Each `run_*` function wires the pipeline from config, runs one job or
//! operation, and prints a short summary to stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::StreamExt;
use sqlx::SqlitePool;

use kmp_indexer_core::models::{BanRecord, MavenArtifact};
use kmp_indexer_core::queue::IndexingQueue;

use crate::backoff::BackoffProvider;
use crate::config::Config;
use crate::db;
use crate::indexer::{PackageIndexer, RecordingIndexer};
use crate::jobs::{self, DrainOptions};
use crate::metadata::HttpMetadataClient;
use crate::rate_limit::limiter_from_config;
use crate::report::LogReporter;
use crate::scheduler::Scheduler;
use crate::scraper::ArtifactScraper;
use crate::search_client::CentralSearchClient;
use crate::sqlite_queue::SqliteQueue;

/// Everything a job needs, built once from config.
#[derive(Clone)]
pub struct Pipeline {
    pub pool: SqlitePool,
    pub queue: Arc<SqliteQueue>,
    pub scraper: ArtifactScraper,
}

impl Pipeline {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let limiter = limiter_from_config(&config.rate_limit);
        let search = Arc::new(CentralSearchClient::new(&config.search, limiter.clone())?);
        let metadata_limiter = config.metadata.rate_limited.then(|| limiter.clone());
        let metadata = Arc::new(HttpMetadataClient::new(&config.metadata, metadata_limiter)?);
        let scraper = ArtifactScraper::from_config(config, search, metadata, Arc::new(LogReporter))?;
        Ok(Self {
            queue: Arc::new(SqliteQueue::new(pool.clone())),
            pool,
            scraper,
        })
    }
}

fn worker_id() -> String {
    format!("kmpi-{}", uuid::Uuid::new_v4())
}

fn drain_options(config: &Config, limit: Option<usize>) -> DrainOptions {
    DrainOptions {
        worker: worker_id(),
        lease: chrono::Duration::seconds(config.queue.lease_secs),
        limit: limit.unwrap_or(config.queue.drain_batch_size),
    }
}

/// Parse `--since`: RFC 3339 or `YYYY-MM-DD` (midnight UTC).
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid --since '{}': expected YYYY-MM-DD or RFC 3339", raw))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Invalid --since '{}'", raw))
}

/// Parse a `group:artifact:version` triple.
pub fn parse_gav(raw: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    match parts.as_slice() {
        [g, a, v] if !g.is_empty() && !a.is_empty() && !v.is_empty() => {
            Ok((g.to_string(), a.to_string(), v.to_string()))
        }
        _ => bail!("Expected group:artifact:version, got '{}'", raw),
    }
}

pub async fn run_discover(config: &Config, since: Option<String>) -> Result<()> {
    let since = since.as_deref().map(parse_since).transpose()?;
    let pipeline = Pipeline::connect(config).await?;
    let outcome = jobs::run_discover(
        &pipeline.pool,
        pipeline.queue.as_ref(),
        &pipeline.scraper,
        config.search.source,
        since,
    )
    .await?;

    println!("discover {}", config.search.source);
    println!("  query: {}", pipeline.scraper.kmp_query());
    if let Some(since) = outcome.since {
        println!("  since: {}", since.to_rfc3339());
    }
    println!("  discovered: {}", outcome.discovered);
    println!("  enqueued: {}", outcome.enqueued);
    println!("  page errors: {}", outcome.errors);
    match outcome.checkpoint {
        Some(cp) => println!("  checkpoint: {}", cp.to_rfc3339()),
        None => println!("  checkpoint: none"),
    }
    println!("ok");

    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_versions(config: &Config, coordinate: &str, enqueue: bool) -> Result<()> {
    let (group_id, artifact_id) = coordinate
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Expected group:artifact, got '{}'", coordinate))?;
    let pipeline = Pipeline::connect(config).await?;
    let mut versions = pipeline.scraper.find_all_versions(group_id, artifact_id)?;

    let mut found = 0u64;
    let mut enqueued = 0u64;
    while let Some(artifact) = versions.next().await {
        found += 1;
        let released = artifact
            .released_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<24} {}", artifact.version, released);
        if enqueue && pipeline.queue.enqueue(&artifact, false).await? {
            enqueued += 1;
        }
    }

    println!();
    println!("{} versions of {}:{}", found, group_id, artifact_id);
    if enqueue {
        println!("enqueued: {}", enqueued);
    }
    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_refresh(config: &Config) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let backoff = BackoffProvider::new("refresh");
    let outcome = jobs::run_refresh(pipeline.queue.as_ref(), &pipeline.scraper, &backoff).await?;

    println!("refresh");
    println!("  coordinates: {}", outcome.coordinates);
    println!("  backed off: {}", outcome.backed_off);
    println!("  new versions: {}", outcome.discovered);
    println!("  enqueued: {}", outcome.enqueued);
    println!("  errors: {}", outcome.errors);
    println!("ok");

    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_drain(config: &Config, limit: Option<usize>) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let indexer = RecordingIndexer::new(pipeline.queue.clone());
    let backoff = BackoffProvider::new("drain");
    let options = drain_options(config, limit);
    let outcome = jobs::run_drain(pipeline.queue.as_ref(), &indexer, &backoff, &options).await?;

    println!("drain ({})", options.worker);
    println!("  indexed: {}", outcome.indexed);
    println!("  failed: {}", outcome.failed);
    println!("  abandoned: {}", outcome.abandoned);
    println!("  removed: {}", outcome.removed);
    println!("ok");

    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_enqueue(config: &Config, gav: &str, reindex: bool) -> Result<()> {
    let (group_id, artifact_id, version) = parse_gav(gav)?;
    let pool = db::connect(config).await?;
    let queue = SqliteQueue::new(pool.clone());
    let artifact = MavenArtifact {
        group_id,
        artifact_id,
        version,
        scraper_source: config.search.source,
        released_at: None,
    };
    if queue.enqueue(&artifact, reindex).await? {
        println!("enqueued {}{}", artifact, if reindex { " (reindex)" } else { "" });
    } else {
        println!("{} is already queued", artifact);
    }
    pool.close().await;
    Ok(())
}

pub async fn run_ban(config: &Config, group_id: &str, artifact_id: Option<String>) -> Result<()> {
    if group_id.trim().is_empty() {
        bail!("Group id must not be empty");
    }
    let pool = db::connect(config).await?;
    let queue = SqliteQueue::new(pool.clone());
    let ban = BanRecord {
        group_id: group_id.trim().to_string(),
        artifact_id: artifact_id.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
    };
    queue.ban(&ban).await?;
    match &ban.artifact_id {
        Some(artifact_id) => println!("banned {}:{}", ban.group_id, artifact_id),
        None => println!("banned group {}", ban.group_id),
    }
    pool.close().await;
    Ok(())
}

/// Run discover, refresh, and drain on their configured intervals until
/// Ctrl+C.
pub async fn run_worker(config: &Config) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let source = config.search.source;
    let indexer: Arc<dyn PackageIndexer> = Arc::new(RecordingIndexer::new(pipeline.queue.clone()));
    let backoff = Arc::new(BackoffProvider::new("drain"));
    let refresh_backoff = Arc::new(BackoffProvider::new("refresh"));
    let options = drain_options(config, None);
    tracing::info!(worker = %options.worker, "worker starting");

    let discover = pipeline.clone();
    let refresh = pipeline.clone();
    let drain = pipeline.clone();

    let scheduler = Scheduler::new()
        .every(
            "discover",
            Duration::from_secs(config.jobs.discover_interval_secs),
            move || {
                let p = discover.clone();
                async move {
                    jobs::run_discover(&p.pool, p.queue.as_ref(), &p.scraper, source, None).await?;
                    Ok(())
                }
            },
        )
        .every(
            "refresh",
            Duration::from_secs(config.jobs.refresh_interval_secs),
            move || {
                let p = refresh.clone();
                let backoff = refresh_backoff.clone();
                async move {
                    jobs::run_refresh(p.queue.as_ref(), &p.scraper, &backoff).await?;
                    Ok(())
                }
            },
        )
        .every(
            "drain",
            Duration::from_secs(config.jobs.drain_interval_secs),
            move || {
                let p = drain.clone();
                let indexer = indexer.clone();
                let backoff = backoff.clone();
                let options = options.clone();
                async move {
                    jobs::run_drain(p.queue.as_ref(), indexer.as_ref(), &backoff, &options)
                        .await?;
                    Ok(())
                }
            },
        );

    scheduler
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for Ctrl+C");
            }
        })
        .await;

    pipeline.pool.close().await;
    println!("worker stopped");
    Ok(())
}
