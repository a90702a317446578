//! Artifact discovery scans.
//!
//! Three lazy, finite scans produce [`MavenArtifact`] streams:
//!
//! | Scan | Method | Source | Stops when |
//! |------|--------|--------|-----------|
//! | Incremental discovery | [`find_new_artifacts`](ArtifactScraper::find_new_artifacts) | search, KMP query + `since` | a page comes back empty |
//! | Version enumeration | [`find_all_versions`](ArtifactScraper::find_all_versions) | search, one artifact | retrieved count reaches `total_hits` |
//! | Metadata diff | [`find_new_versions`](ArtifactScraper::find_new_versions) | `maven-metadata.xml` | every coordinate was visited |
//!
//! Discovery and version enumeration keep separate termination rules: an open-ended discovery query
//! has no trustworthy total, a single-artifact query does.
//!
//! Each scan fetches one page (or one coordinate) per exhausted buffer, and
//! dropping the stream stops further fetches. Page and coordinate failures
//! go to the [`ErrorReporter`]; the scan carries on. Only query construction
//! fails synchronously.
//!
//! A scan is a single-consumer stream. Independent scans may run at the same
//! time and share the search client's rate limiter.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use kmp_indexer_core::models::{Coordinate, MavenArtifact, ScraperSource, SearchPage};
use kmp_indexer_core::query::SearchQuery;
use kmp_indexer_core::queue::KnownVersions;

use crate::config::Config;
use crate::error::ScrapeError;
use crate::metadata::MetadataClient;
use crate::report::ErrorReporter;
use crate::search_client::SearchClient;

/// Discovery scans over a search client and a metadata client.
#[derive(Clone)]
pub struct ArtifactScraper {
    search: Arc<dyn SearchClient>,
    metadata: Arc<dyn MetadataClient>,
    reporter: Arc<dyn ErrorReporter>,
    kmp_query: SearchQuery,
    source: ScraperSource,
    max_consecutive_failures: u32,
}

impl ArtifactScraper {
    pub fn new(
        search: Arc<dyn SearchClient>,
        metadata: Arc<dyn MetadataClient>,
        reporter: Arc<dyn ErrorReporter>,
        kmp_query: SearchQuery,
        source: ScraperSource,
    ) -> Self {
        Self {
            search,
            metadata,
            reporter,
            kmp_query,
            source,
            max_consecutive_failures: 5,
        }
    }

    /// Scraper wired with the query, source, and failure cap from `config`.
    pub fn from_config(
        config: &Config,
        search: Arc<dyn SearchClient>,
        metadata: Arc<dyn MetadataClient>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        Ok(Self::new(
            search,
            metadata,
            reporter,
            config.search.kmp_query()?,
            config.search.source,
        )
        .with_max_consecutive_failures(config.scan.max_consecutive_page_failures))
    }

    /// Give up a paged scan after `n` failed pages in a row.
    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }

    /// Use a different error channel for scans started from the returned
    /// scraper.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn kmp_query(&self) -> &SearchQuery {
        &self.kmp_query
    }

    fn paging(&self, query: SearchQuery, since: Option<DateTime<Utc>>) -> PagingState {
        PagingState {
            client: Arc::clone(&self.search),
            reporter: Arc::clone(&self.reporter),
            query,
            since,
            source: self.source,
            page: 0,
            consecutive_failures: 0,
            max_consecutive_failures: self.max_consecutive_failures,
            last_total: None,
            done: false,
        }
    }

    /// Incremental discovery: every KMP artifact published at or after `since`.
    ///
    /// Pages from 0 and stops at the first page with no records. A failed
    /// page is reported and skipped.
    pub fn find_new_artifacts(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, MavenArtifact> {
        let state = self.paging(self.kmp_query.clone(), since);
        stream::unfold(state, |mut s| async move {
            loop {
                if s.done {
                    return None;
                }
                let page = s.page;
                match s.client.search(page, &s.query, s.since).await {
                    Ok(result) => {
                        s.page_succeeded();
                        if result.records.is_empty() {
                            return None;
                        }
                        tracing::debug!(page, records = result.current_hits, "discovery page");
                        let items = s.artifacts(result);
                        return Some((items, s));
                    }
                    Err(err) => s.page_failed(err),
                }
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// Version enumeration: every published version of `group_id:artifact_id`.
    ///
    /// Continues while `total_hits > page_size * page + current_hits`. A
    /// failed page is reported; the scan moves on only if an earlier page
    /// reported a total that says more pages remain.
    pub fn find_all_versions(
        &self,
        group_id: &str,
        artifact_id: &str,
    ) -> Result<BoxStream<'static, MavenArtifact>, ScrapeError> {
        let query = SearchQuery::artifact_versions(group_id, artifact_id)?;
        let state = self.paging(query, None);
        let stream = stream::unfold(state, |mut s| async move {
            loop {
                if s.done {
                    return None;
                }
                let page = s.page;
                let page_size = s.client.page_size() as u64;
                match s.client.search(page, &s.query, None).await {
                    Ok(result) => {
                        s.page_succeeded();
                        let retrieved = page_size * page as u64 + result.current_hits;
                        s.last_total = Some(result.total_hits);
                        if result.total_hits <= retrieved {
                            s.done = true;
                        }
                        let items = s.artifacts(result);
                        return Some((items, s));
                    }
                    Err(err) => {
                        s.page_failed(err);
                        // s.page already points past the failed page.
                        let more = s
                            .last_total
                            .is_some_and(|total| total > page_size * s.page as u64);
                        if !more {
                            s.done = true;
                        }
                    }
                }
            }
        })
        .flat_map(stream::iter)
        .boxed();
        Ok(stream)
    }

    /// Metadata diff: versions listed in each coordinate's metadata but missing
    /// from `known`.
    ///
    /// Keys that are not exactly `groupId:artifactId` are skipped without a
    /// report. Emitted artifacts have no release time. Coordinates are
    /// visited in sorted order.
    pub fn find_new_versions(&self, known: KnownVersions) -> BoxStream<'static, MavenArtifact> {
        let mut coordinates: Vec<(Coordinate, HashSet<String>)> = known
            .into_iter()
            .filter_map(|(key, versions)| Coordinate::parse(&key).map(|c| (c, versions)))
            .collect();
        coordinates.sort_by(|a, b| a.0.cmp(&b.0));

        let client = Arc::clone(&self.metadata);
        let reporter = Arc::clone(&self.reporter);
        let source = self.source;

        stream::iter(coordinates)
            .then(move |(coordinate, known_versions)| {
                let client = Arc::clone(&client);
                let reporter = Arc::clone(&reporter);
                async move {
                    match client.fetch_versions(&coordinate).await {
                        Ok(metadata) => {
                            let mut seen = HashSet::new();
                            metadata
                                .versions
                                .into_iter()
                                .filter(|v| !known_versions.contains(v) && seen.insert(v.clone()))
                                .map(|version| MavenArtifact {
                                    group_id: coordinate.group_id.clone(),
                                    artifact_id: coordinate.artifact_id.clone(),
                                    version,
                                    scraper_source: source,
                                    released_at: None,
                                })
                                .collect::<Vec<_>>()
                        }
                        Err(err) => {
                            reporter.report(ScrapeError::coordinate(&coordinate, err));
                            Vec::new()
                        }
                    }
                }
            })
            .flat_map(stream::iter)
            .boxed()
    }
}

struct PagingState {
    client: Arc<dyn SearchClient>,
    reporter: Arc<dyn ErrorReporter>,
    query: SearchQuery,
    since: Option<DateTime<Utc>>,
    source: ScraperSource,
    page: u32,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
    last_total: Option<u64>,
    done: bool,
}

impl PagingState {
    fn page_succeeded(&mut self) {
        self.consecutive_failures = 0;
        self.page += 1;
    }

    fn page_failed(&mut self, err: anyhow::Error) {
        self.reporter
            .report(ScrapeError::page(&self.query, self.page, err));
        self.page += 1;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.max_consecutive_failures {
            self.reporter.report(ScrapeError::TooManyFailures {
                query: self.query.to_string(),
                failures: self.consecutive_failures,
            });
            self.done = true;
        }
    }

    fn artifacts(&self, page: SearchPage) -> Vec<MavenArtifact> {
        page.records
            .into_iter()
            .map(|record| MavenArtifact::from_record(record, self.source))
            .collect()
    }
}
