//! SQLite-backed [`IndexingQueue`] implementation.
//!
//! SQLite has no `SELECT .. FOR UPDATE SKIP LOCKED`, so a row lock is
//! modelled as a claim column pair (`claimed_by`, `claimed_until`). A claim
//! is one `UPDATE .. WHERE id = (SELECT .. LIMIT 1) RETURNING ..` statement.
//! SQLite takes the write lock before such a statement starts reading, so
//! two workers can never pick the same row: the second one runs after the
//! first has committed and no longer sees the claimed row.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use kmp_indexer_core::models::{
    BanRecord, IndexingRequest, MavenArtifact, QueueStats, MAX_FAILED_ATTEMPTS,
};
use kmp_indexer_core::queue::{Claim, CoordinateIds, IndexingQueue, KnownVersions};

const REQUEST_COLUMNS: &str = "id, group_id, artifact_id, version, released_at, scraper_source, \
     reindex, failed_attempts, failed_at, last_error_message";

/// SQLite implementation of the [`IndexingQueue`] trait.
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fetch a request by id regardless of its state.
    pub async fn get(&self, id: i64) -> Result<Option<IndexingRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM indexing_requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| request_from_row(&r)).transpose()
    }

    /// Abandoned requests, most recently failed first.
    pub async fn list_abandoned(&self, limit: i64) -> Result<Vec<IndexingRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM indexing_requests WHERE failed_attempts >= ? \
             ORDER BY failed_at DESC LIMIT ?",
            REQUEST_COLUMNS
        ))
        .bind(MAX_FAILED_ATTEMPTS as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(request_from_row).collect()
    }
}

fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn request_from_row(row: &SqliteRow) -> Result<IndexingRequest> {
    let source: String = row.try_get("scraper_source")?;
    let failed_attempts: i64 = row.try_get("failed_attempts")?;
    Ok(IndexingRequest {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        artifact_id: row.try_get("artifact_id")?,
        version: row.try_get("version")?,
        released_at: millis_to_datetime(row.try_get("released_at")?),
        scraper_source: source.parse()?,
        reindex: row.try_get::<i64, _>("reindex")? != 0,
        failed_attempts: u32::try_from(failed_attempts).unwrap_or(u32::MAX),
        failed_at: millis_to_datetime(row.try_get("failed_at")?),
        last_error_message: row.try_get("last_error_message")?,
    })
}

#[async_trait]
impl IndexingQueue for SqliteQueue {
    async fn enqueue(&self, artifact: &MavenArtifact, reindex: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO indexing_requests (group_id, artifact_id, version, released_at,
                                           scraper_source, reindex, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id, artifact_id, version) DO NOTHING
            "#,
        )
        .bind(&artifact.group_id)
        .bind(&artifact.artifact_id)
        .bind(&artifact.version)
        .bind(artifact.released_at.map(|dt| dt.timestamp_millis()))
        .bind(artifact.scraper_source.as_str())
        .bind(reindex as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_next(&self, claim: &Claim<'_>) -> Result<Option<IndexingRequest>> {
        let exclude_json = serde_json::to_string(claim.exclude)?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE indexing_requests
            SET claimed_by = ?, claimed_until = ?
            WHERE id = (
                SELECT r.id FROM indexing_requests r
                WHERE r.failed_attempts < ?
                  AND (r.claimed_until IS NULL OR r.claimed_until <= ?)
                  AND NOT EXISTS (
                      SELECT 1 FROM banned_packages b
                      WHERE b.group_id = r.group_id
                        AND (b.artifact_id = '' OR b.artifact_id = r.artifact_id)
                  )
                  AND r.id NOT IN (SELECT value FROM json_each(?))
                ORDER BY r.released_at IS NOT NULL, r.released_at DESC, r.id
                LIMIT 1
            )
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(claim.worker)
        .bind(claim.expires_at().timestamp_millis())
        .bind(MAX_FAILED_ATTEMPTS as i64)
        .bind(claim.now.timestamp_millis())
        .bind(exclude_json)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| request_from_row(&r)).transpose()
    }

    async fn mark_failed(&self, id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE indexing_requests
            SET failed_attempts = failed_attempts + 1,
                failed_at = ?,
                last_error_message = ?,
                claimed_by = NULL,
                claimed_until = NULL
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE indexing_requests SET claimed_by = NULL, claimed_until = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_reindex(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE indexing_requests SET reindex = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_already_indexed(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM indexing_requests
            WHERE reindex = 0
              AND EXISTS (
                  SELECT 1 FROM packages p
                  WHERE p.group_id = indexing_requests.group_id
                    AND p.artifact_id = indexing_requests.artifact_id
                    AND p.version = indexing_requests.version
              )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ban(&self, ban: &BanRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO banned_packages (group_id, artifact_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(group_id, artifact_id) DO NOTHING
            "#,
        )
        .bind(&ban.group_id)
        .bind(ban.artifact_id.as_deref().unwrap_or(""))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_indexed(&self, artifact: &MavenArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO packages (group_id, artifact_id, version, released_at, scraper_source, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(group_id, artifact_id, version) DO UPDATE SET
                released_at = COALESCE(excluded.released_at, packages.released_at),
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&artifact.group_id)
        .bind(&artifact.artifact_id)
        .bind(&artifact.version)
        .bind(artifact.released_at.map(|dt| dt.timestamp_millis()))
        .bind(artifact.scraper_source.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn known_versions(&self) -> Result<KnownVersions> {
        let rows = sqlx::query("SELECT group_id, artifact_id, version FROM packages")
            .fetch_all(&self.pool)
            .await?;
        let mut known = KnownVersions::new();
        for row in &rows {
            let group_id: String = row.try_get("group_id")?;
            let artifact_id: String = row.try_get("artifact_id")?;
            known
                .entry(format!("{}:{}", group_id, artifact_id))
                .or_default()
                .insert(row.try_get("version")?);
        }
        Ok(known)
    }

    async fn coordinate_ids(&self) -> Result<CoordinateIds> {
        // Rows in `packages` are never deleted, so the first id of a
        // coordinate is stable.
        let rows = sqlx::query(
            "SELECT group_id, artifact_id, MIN(id) AS id FROM packages GROUP BY group_id, artifact_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut ids = CoordinateIds::new();
        for row in &rows {
            let group_id: String = row.try_get("group_id")?;
            let artifact_id: String = row.try_get("artifact_id")?;
            ids.insert(format!("{}:{}", group_id, artifact_id), row.try_get("id")?);
        }
        Ok(ids)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN failed_attempts < ?1 THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN failed_attempts >= ?1 THEN 1 ELSE 0 END), 0) AS abandoned,
                COALESCE(SUM(CASE WHEN failed_attempts < ?1 AND claimed_until > ?2 THEN 1 ELSE 0 END), 0) AS claimed
            FROM indexing_requests
            "#,
        )
        .bind(MAX_FAILED_ATTEMPTS as i64)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.try_get::<i64, _>("pending")? as u64,
            abandoned: row.try_get::<i64, _>("abandoned")? as u64,
            claimed: row.try_get::<i64, _>("claimed")? as u64,
        })
    }
}
