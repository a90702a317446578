//! Queue and index health overview for `kmpi stats`.
//!
//! Abandoned requests are never purged, so this is where they surface:
//! the summary lists the most recent ones with their last error.

use anyhow::Result;
use sqlx::Row;

use kmp_indexer_core::queue::IndexingQueue;

use crate::config::Config;
use crate::db;
use crate::sqlite_queue::SqliteQueue;

const ABANDONED_SHOWN: i64 = 10;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let queue = SqliteQueue::new(pool.clone());
    let stats = queue.stats().await?;

    let packages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM packages")
        .fetch_one(&pool)
        .await?;
    let coordinates: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT group_id || ':' || artifact_id) FROM packages")
            .fetch_one(&pool)
            .await?;
    let bans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM banned_packages")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("KMP Indexer Queue Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Pending:     {}", stats.pending);
    println!("  Claimed:     {}", stats.claimed);
    println!("  Abandoned:   {}", stats.abandoned);
    println!("  Indexed:     {} versions of {} artifacts", packages, coordinates);
    println!("  Bans:        {}", bans);

    let checkpoint_rows = sqlx::query("SELECT source, cursor, updated_at FROM checkpoints ORDER BY source")
        .fetch_all(&pool)
        .await?;
    if !checkpoint_rows.is_empty() {
        println!();
        println!("  Checkpoints:");
        println!("  {:<28} {:<20} {}", "SOURCE", "CURSOR", "UPDATED");
        println!("  {}", "-".repeat(64));
        for row in &checkpoint_rows {
            let source: String = row.get("source");
            let cursor: String = row.get("cursor");
            let cursor_display = cursor
                .parse::<i64>()
                .ok()
                .map(|ms| format_ts_iso(ms / 1000))
                .unwrap_or(cursor);
            println!(
                "  {:<28} {:<20} {}",
                source,
                cursor_display,
                format_ts_relative(row.get("updated_at"))
            );
        }
    }

    let abandoned = queue.list_abandoned(ABANDONED_SHOWN).await?;
    if !abandoned.is_empty() {
        println!();
        println!("  Recently abandoned:");
        for request in &abandoned {
            let failed = request
                .failed_at
                .map(|dt| format_ts_relative(dt.timestamp()))
                .unwrap_or_else(|| "unknown".to_string());
            println!("  {}  ({})", request.artifact(), failed);
            if let Some(message) = &request.last_error_message {
                println!("      {}", message);
            }
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now, e.g. "3 hours ago".
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        0..=59 => "just now".to_string(),
        60..=3599 => plural(delta / 60, "min"),
        3600..=86_399 => plural(delta / 3600, "hour"),
        d if d < 86_400 * 30 => plural(d / 86_400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
