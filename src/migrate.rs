use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Indexing queue. Timestamps are Unix epoch milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexing_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id TEXT NOT NULL,
            artifact_id TEXT NOT NULL,
            version TEXT NOT NULL,
            released_at INTEGER,
            scraper_source TEXT NOT NULL,
            reindex INTEGER NOT NULL DEFAULT 0,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            failed_at INTEGER,
            last_error_message TEXT,
            claimed_by TEXT,
            claimed_until INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(group_id, artifact_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ban list. An empty artifact_id bans the whole group; NULL cannot take
    // part in the UNIQUE constraint, so '' stands in for it on disk.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS banned_packages (
            group_id TEXT NOT NULL,
            artifact_id TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            PRIMARY KEY (group_id, artifact_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexed-package store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id TEXT NOT NULL,
            artifact_id TEXT NOT NULL,
            version TEXT NOT NULL,
            released_at INTEGER,
            scraper_source TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            UNIQUE(group_id, artifact_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Discovery checkpoints
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_selection ON indexing_requests(failed_attempts, released_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_packages_coordinate ON packages(group_id, artifact_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
