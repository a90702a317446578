//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use kmp_indexer::metadata::{MetadataClient, VersionsMetadata};
use kmp_indexer::models::{ArtifactRecord, Coordinate, ScraperSource, SearchPage};
use kmp_indexer::query::{SearchQuery, Term};
use kmp_indexer::report::ErrorReporter;
use kmp_indexer::scraper::ArtifactScraper;
use kmp_indexer::search_client::SearchClient;

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// `n` records named `lib{start}..`, released one second apart.
pub fn records(start: u64, n: u64) -> Vec<ArtifactRecord> {
    (start..start + n)
        .map(|i| ArtifactRecord {
            group_id: "io.test".into(),
            artifact_id: format!("lib{}", i),
            version: format!("1.0.{}", i),
            released_at: Some(ts(1_700_000_000 + i as i64)),
        })
        .collect()
}

/// One recorded `search` call.
#[derive(Debug, Clone)]
pub struct SearchCall {
    pub page: u32,
    pub query: String,
    pub since: Option<DateTime<Utc>>,
}

/// Search client replaying scripted pages. Pages past the script are empty.
pub struct FakeSearch {
    page_size: u32,
    pages: Vec<Result<SearchPage, String>>,
    calls: Mutex<Vec<SearchCall>>,
}

impl FakeSearch {
    pub fn new(page_size: u32, pages: Vec<Result<SearchPage, String>>) -> Self {
        Self {
            page_size,
            pages,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pages of the given sizes, all reporting `total` hits.
    pub fn with_sizes(page_size: u32, total: u64, sizes: &[u64]) -> Self {
        let mut offset = 0;
        let pages = sizes
            .iter()
            .map(|&n| {
                let page = SearchPage::new(total, records(offset, n));
                offset += n;
                Ok(page)
            })
            .collect();
        Self::new(page_size, pages)
    }

    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchClient for FakeSearch {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn search(
        &self,
        page: u32,
        query: &SearchQuery,
        since: Option<DateTime<Utc>>,
    ) -> Result<SearchPage> {
        self.calls.lock().unwrap().push(SearchCall {
            page,
            query: query.to_string(),
            since,
        });
        match self.pages.get(page as usize) {
            Some(Ok(p)) => Ok(p.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(SearchPage::default()),
        }
    }
}

/// Metadata client answering from a fixed map; unknown coordinates fail.
#[derive(Default)]
pub struct FakeMetadata {
    versions: HashMap<Coordinate, Vec<String>>,
    fetched: Mutex<Vec<Coordinate>>,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: &str, artifact: &str, versions: &[&str]) -> Self {
        self.versions.insert(
            Coordinate::new(group, artifact),
            versions.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn fetched(&self) -> Vec<Coordinate> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn fetch_versions(&self, coordinate: &Coordinate) -> Result<VersionsMetadata> {
        self.fetched.lock().unwrap().push(coordinate.clone());
        let versions = self
            .versions
            .get(coordinate)
            .ok_or_else(|| anyhow::anyhow!("GET {} returned 404 Not Found", coordinate))?;
        Ok(VersionsMetadata {
            group_id: coordinate.group_id.clone(),
            artifact_id: coordinate.artifact_id.clone(),
            versions: versions.clone(),
            ..VersionsMetadata::default()
        })
    }
}

pub fn kmp_query() -> SearchQuery {
    SearchQuery::and(vec![Term::new("l", "kotlin-tooling-metadata")]).unwrap()
}

pub fn scraper(
    search: Arc<FakeSearch>,
    metadata: Arc<FakeMetadata>,
    reporter: Arc<dyn ErrorReporter>,
) -> ArtifactScraper {
    ArtifactScraper::new(
        search,
        metadata,
        reporter,
        kmp_query(),
        ScraperSource::MavenCentral,
    )
}
