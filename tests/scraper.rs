//! Discovery scan behavior against fake upstreams.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;

use kmp_indexer::error::ScrapeError;
use kmp_indexer::models::{MavenArtifact, SearchPage};
use kmp_indexer::report::CollectingReporter;

use common::{records, scraper, ts, FakeMetadata, FakeSearch};

async fn collect(stream: futures::stream::BoxStream<'static, MavenArtifact>) -> Vec<MavenArtifact> {
    stream.collect().await
}

// ─── Incremental discovery ──────────────────────────────────────────

#[tokio::test]
async fn new_artifacts_stop_at_first_empty_page() {
    let search = Arc::new(FakeSearch::with_sizes(2, 0, &[2, 2, 0]));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone());

    let found = collect(s.find_new_artifacts(Some(ts(1_000)))).await;

    assert_eq!(found.len(), 4);
    let pages: Vec<u32> = search.calls().iter().map(|c| c.page).collect();
    assert_eq!(pages, vec![0, 1, 2]);
    assert!(search.calls().iter().all(|c| c.since == Some(ts(1_000))));
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn failed_page_is_reported_and_skipped() {
    let search = Arc::new(FakeSearch::new(
        2,
        vec![
            Ok(SearchPage::new(0, records(0, 2))),
            Err("HTTP 502 Bad Gateway".into()),
            Ok(SearchPage::new(0, records(10, 2))),
        ],
    ));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone());

    let found = collect(s.find_new_artifacts(None)).await;

    let names: Vec<&str> = found.iter().map(|a| a.artifact_id.as_str()).collect();
    assert_eq!(names, vec!["lib0", "lib1", "lib10", "lib11"]);

    let errors = reporter.take();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ScrapeError::Page { query, page, .. } => {
            assert_eq!(*page, 1);
            assert_eq!(query, &search.calls()[1].query);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn dead_upstream_gives_up_after_consecutive_failures() {
    let pages = (0..10).map(|_| Err("connection refused".to_string())).collect();
    let search = Arc::new(FakeSearch::new(2, pages));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone())
        .with_max_consecutive_failures(3);

    let found = collect(s.find_new_artifacts(None)).await;

    assert!(found.is_empty());
    assert_eq!(search.calls().len(), 3);
    let errors = reporter.take();
    assert_eq!(errors.len(), 4);
    assert!(matches!(
        errors.last(),
        Some(ScrapeError::TooManyFailures { failures: 3, .. })
    ));
}

#[tokio::test]
async fn dropping_the_stream_stops_fetching() {
    let search = Arc::new(FakeSearch::with_sizes(2, 0, &[2, 2, 2, 2]));
    let s = scraper(
        search.clone(),
        Arc::new(FakeMetadata::new()),
        Arc::new(CollectingReporter::new()),
    );

    let first_three: Vec<_> = s.find_new_artifacts(None).take(3).collect().await;

    assert_eq!(first_three.len(), 3);
    assert_eq!(search.calls().len(), 2);
}

// ─── Version enumeration ────────────────────────────────────────────

#[tokio::test]
async fn all_versions_stop_when_total_is_reached() {
    let search = Arc::new(FakeSearch::with_sizes(2, 4, &[2, 2, 2]));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone());

    let found = collect(s.find_all_versions("io.test", "lib").unwrap()).await;

    assert_eq!(found.len(), 4);
    assert_eq!(search.calls().len(), 2);
    assert_eq!(search.calls()[0].query, "g:\"io.test\" AND a:\"lib\"");
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn all_versions_continue_past_error_when_total_is_known() {
    let search = Arc::new(FakeSearch::new(
        2,
        vec![
            Ok(SearchPage::new(6, records(0, 2))),
            Err("timeout".into()),
            Ok(SearchPage::new(6, records(4, 2))),
        ],
    ));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone());

    let found = collect(s.find_all_versions("io.test", "lib").unwrap()).await;

    assert_eq!(found.len(), 4);
    assert_eq!(search.calls().len(), 3);
    assert_eq!(reporter.len(), 1);
}

#[tokio::test]
async fn all_versions_stop_when_first_page_fails() {
    let search = Arc::new(FakeSearch::new(
        2,
        vec![Err("timeout".into()), Ok(SearchPage::new(4, records(2, 2)))],
    ));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(search.clone(), Arc::new(FakeMetadata::new()), reporter.clone());

    let found = collect(s.find_all_versions("io.test", "lib").unwrap()).await;

    assert!(found.is_empty());
    assert_eq!(search.calls().len(), 1);
    assert_eq!(reporter.len(), 1);
}

#[tokio::test]
async fn invalid_coordinates_fail_synchronously() {
    let search = Arc::new(FakeSearch::with_sizes(2, 0, &[]));
    let s = scraper(
        search.clone(),
        Arc::new(FakeMetadata::new()),
        Arc::new(CollectingReporter::new()),
    );

    assert!(matches!(
        s.find_all_versions("", "lib"),
        Err(ScrapeError::InvalidQuery(_))
    ));
    assert!(matches!(
        s.find_all_versions("io.test", "lib\" OR *:*"),
        Err(ScrapeError::InvalidQuery(_))
    ));
    assert!(search.calls().is_empty());
}

// ─── Metadata diff ──────────────────────────────────────────────────

fn known(entries: &[(&str, &[&str])]) -> HashMap<String, HashSet<String>> {
    entries
        .iter()
        .map(|(key, versions)| {
            (
                key.to_string(),
                versions.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}

#[tokio::test]
async fn new_versions_skip_malformed_keys_silently() {
    let metadata = Arc::new(FakeMetadata::new().with("io.ktor", "ktor-io", &["1.0", "2.0", "3.0"]));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(
        Arc::new(FakeSearch::with_sizes(2, 0, &[])),
        metadata.clone(),
        reporter.clone(),
    );

    let found = collect(s.find_new_versions(known(&[
        ("io.ktor:ktor-io", &["1.0"]),
        ("not-a-coordinate", &[]),
    ])))
    .await;

    let versions: Vec<&str> = found.iter().map(|a| a.version.as_str()).collect();
    assert_eq!(versions, vec!["2.0", "3.0"]);
    assert!(found.iter().all(|a| a.released_at.is_none()));
    assert_eq!(metadata.fetched().len(), 1);
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn new_versions_report_failing_coordinate_and_continue() {
    let metadata = Arc::new(FakeMetadata::new().with("io.ktor", "ktor-io", &["1.0", "2.0"]));
    let reporter = Arc::new(CollectingReporter::new());
    let s = scraper(
        Arc::new(FakeSearch::with_sizes(2, 0, &[])),
        metadata.clone(),
        reporter.clone(),
    );

    let found = collect(s.find_new_versions(known(&[
        ("com.missing:gone", &["1.0"]),
        ("io.ktor:ktor-io", &["1.0"]),
        ("a:b:c", &[]),
    ])))
    .await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].to_string(), "io.ktor:ktor-io:2.0");
    let errors = reporter.take();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ScrapeError::Coordinate { coordinate, .. } if coordinate == "com.missing:gone"
    ));
}
