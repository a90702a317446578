//! Paged search against an upstream artifact search API.
//!
//! A [`SearchClient`] executes exactly one page of a query per call and
//! never retries; retry and backoff belong to the caller. Every request is
//! gated by the shared [`RequestLimiter`].
//!
//! [`CentralSearchClient`] speaks the Solr-style API of `search.maven.org`:
//!
//! ```text
//! GET {base}/solrsearch/select?q=..&start=..&rows=..&wt=json&sort=timestamp asc[&core=gav]
//! ```
//!
//! Results are sorted by publication timestamp ascending, so consecutive
//! pages of an unmodified dataset neither repeat nor skip records.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kmp_indexer_core::models::{ArtifactRecord, SearchPage};
use kmp_indexer_core::query::SearchQuery;

use crate::config::SearchConfig;
use crate::rate_limit::{acquire_and_run, RequestLimiter};

/// One page of a search query per call.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Fixed number of records requested per page.
    fn page_size(&self) -> u32;

    /// Fetch zero-based `page` of `query`, restricted to records published
    /// at or after `since` when given.
    async fn search(
        &self,
        page: u32,
        query: &SearchQuery,
        since: Option<DateTime<Utc>>,
    ) -> Result<SearchPage>;
}

/// Client for the Maven Central search API.
pub struct CentralSearchClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    limiter: Arc<dyn RequestLimiter>,
}

impl CentralSearchClient {
    pub fn new(config: &SearchConfig, limiter: Arc<dyn RequestLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("kmp-indexer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            limiter,
        })
    }

    fn params(
        &self,
        page: u32,
        query: &SearchQuery,
        since: Option<DateTime<Utc>>,
    ) -> Vec<(&'static str, String)> {
        let mut q = query.to_string();
        if let Some(since) = since {
            q = format!("{} AND timestamp:[{} TO *]", q, since.timestamp_millis());
        }
        let start = page as u64 * self.page_size as u64;
        let mut params = vec![
            ("q", q),
            ("start", start.to_string()),
            ("rows", self.page_size.to_string()),
            ("wt", "json".to_string()),
            ("sort", "timestamp asc".to_string()),
        ];
        if query.all_versions() {
            params.push(("core", "gav".to_string()));
        }
        params
    }
}

#[async_trait]
impl SearchClient for CentralSearchClient {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn search(
        &self,
        page: u32,
        query: &SearchQuery,
        since: Option<DateTime<Utc>>,
    ) -> Result<SearchPage> {
        let url = format!("{}/solrsearch/select", self.base_url);
        let params = self.params(page, query, since);

        acquire_and_run(self.limiter.as_ref(), || async {
            tracing::debug!(page, query = %query, "search request");
            let response = self.http.get(&url).query(&params).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Search API error {}: {}", status, truncate(&body, 200));
            }
            let json: serde_json::Value = response
                .json()
                .await
                .context("Search API returned malformed JSON")?;
            parse_search_response(&json)
        })
        .await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse a Solr `select` response into a [`SearchPage`].
///
/// Per-version documents (`core=gav`) carry `v`; per-artifact documents
/// carry `latestVersion` instead.
pub fn parse_search_response(json: &serde_json::Value) -> Result<SearchPage> {
    let response = json
        .get("response")
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing response"))?;
    let total_hits = response
        .get("numFound")
        .and_then(|n| n.as_u64())
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing numFound"))?;
    let docs = response
        .get("docs")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing docs array"))?;

    let mut records = Vec::with_capacity(docs.len());
    for doc in docs {
        let field = |name: &str| doc.get(name).and_then(|v| v.as_str());
        let group_id =
            field("g").ok_or_else(|| anyhow::anyhow!("Invalid search response: doc without g"))?;
        let artifact_id =
            field("a").ok_or_else(|| anyhow::anyhow!("Invalid search response: doc without a"))?;
        let version = field("v")
            .or_else(|| field("latestVersion"))
            .ok_or_else(|| anyhow::anyhow!("Invalid search response: doc without version"))?;
        let released_at = doc
            .get("timestamp")
            .and_then(|t| t.as_i64())
            .and_then(DateTime::from_timestamp_millis);

        records.push(ArtifactRecord {
            group_id: group_id.to_string(),
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            released_at,
        });
    }

    Ok(SearchPage::new(total_hits, records))
}
