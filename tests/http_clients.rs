//! HTTP clients against a local mock of the search API and the repository.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};

use kmp_indexer::config::{MetadataConfig, SearchConfig};
use kmp_indexer::metadata::{HttpMetadataClient, MetadataClient};
use kmp_indexer::models::{Coordinate, ScraperSource};
use kmp_indexer::query::SearchQuery;
use kmp_indexer::rate_limit::{RequestLimiter, TokenBucket};
use kmp_indexer::report::CollectingReporter;
use kmp_indexer::scraper::ArtifactScraper;
use kmp_indexer::search_client::{CentralSearchClient, SearchClient};

use common::kmp_query;

type Requests = Arc<Mutex<Vec<HashMap<String, String>>>>;

const KTOR_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>io.ktor</groupId>
  <artifactId>ktor-io</artifactId>
  <versioning>
    <latest>3.0.0</latest>
    <release>3.0.0</release>
    <versions>
      <version>2.3.0</version>
      <version>3.0.0</version>
    </versions>
    <lastUpdated>20241010120000</lastUpdated>
  </versioning>
</metadata>
"#;

/// Three versions of io.ktor:ktor-io, served by `start` and `rows`.
async fn select(
    State(requests): State<Requests>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    requests.lock().unwrap().push(params.clone());
    let docs = vec![
        json!({"g": "io.ktor", "a": "ktor-io", "v": "1.0.0", "timestamp": 1_600_000_000_000_i64}),
        json!({"g": "io.ktor", "a": "ktor-io", "v": "2.3.0", "timestamp": 1_650_000_000_000_i64}),
        json!({"g": "io.ktor", "a": "ktor-io", "v": "3.0.0", "timestamp": 1_700_000_000_000_i64}),
    ];
    let start: usize = params.get("start").and_then(|s| s.parse().ok()).unwrap_or(0);
    let rows: usize = params.get("rows").and_then(|s| s.parse().ok()).unwrap_or(10);
    let page: Vec<Value> = docs.into_iter().skip(start).take(rows).collect();
    Json(json!({"response": {"numFound": 3, "start": start, "docs": page}}))
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance")
}

async fn ktor_metadata() -> impl IntoResponse {
    ([("content-type", "application/xml")], KTOR_METADATA)
}

async fn serve() -> (SocketAddr, Requests) {
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/solrsearch/select", get(select))
        .route("/broken/solrsearch/select", get(unavailable))
        .route("/maven2/io/ktor/ktor-io/maven-metadata.xml", get(ktor_metadata))
        .with_state(requests.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, requests)
}

fn search_config(base_url: String) -> SearchConfig {
    SearchConfig {
        base_url,
        page_size: 2,
        ..SearchConfig::default()
    }
}

fn bucket() -> Arc<TokenBucket> {
    Arc::new(TokenBucket::new(100, 100, Duration::from_secs(1)))
}

#[tokio::test]
async fn search_sends_paging_and_since_parameters() {
    let (addr, requests) = serve().await;
    let limiter = bucket();
    let client =
        CentralSearchClient::new(&search_config(format!("http://{}", addr)), limiter.clone()).unwrap();

    let since = chrono::DateTime::from_timestamp_millis(1_650_000_000_000).unwrap();
    let page = client.search(1, &kmp_query(), Some(since)).await.unwrap();
    assert_eq!(page.total_hits, 3);
    assert_eq!(page.current_hits, 1);
    assert_eq!(page.records[0].version, "3.0.0");

    let params = requests.lock().unwrap()[0].clone();
    assert_eq!(params["start"], "2");
    assert_eq!(params["rows"], "2");
    assert_eq!(params["wt"], "json");
    assert_eq!(
        params["q"],
        "l:\"kotlin-tooling-metadata\" AND timestamp:[1650000000000 TO *]"
    );
    assert!(!params.contains_key("core"));

    assert_eq!(limiter.stats().total_acquired, 1);
    assert!(limiter.last_success().is_some());
}

#[tokio::test]
async fn server_errors_fail_the_page_without_recording_success() {
    let (addr, _) = serve().await;
    let limiter = bucket();
    let client =
        CentralSearchClient::new(&search_config(format!("http://{}/broken", addr)), limiter.clone())
            .unwrap();

    let err = client.search(0, &kmp_query(), None).await.unwrap_err();
    assert!(err.to_string().contains("503"), "{}", err);
    assert_eq!(limiter.stats().total_acquired, 1);
    assert!(limiter.last_success().is_none());
}

#[tokio::test]
async fn all_versions_scan_over_http() {
    let (addr, requests) = serve().await;
    let search = Arc::new(
        CentralSearchClient::new(&search_config(format!("http://{}", addr)), bucket()).unwrap(),
    );
    let metadata = Arc::new(
        HttpMetadataClient::new(
            &MetadataConfig {
                repository_url: format!("http://{}/maven2", addr),
                ..MetadataConfig::default()
            },
            None,
        )
        .unwrap(),
    );
    let reporter = Arc::new(CollectingReporter::new());
    let scraper = ArtifactScraper::new(
        search,
        metadata,
        reporter.clone(),
        kmp_query(),
        ScraperSource::MavenCentral,
    );

    let versions: Vec<String> = scraper
        .find_all_versions("io.ktor", "ktor-io")
        .unwrap()
        .map(|a| a.version)
        .collect()
        .await;
    assert_eq!(versions, vec!["1.0.0", "2.3.0", "3.0.0"]);
    assert!(reporter.is_empty());

    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["core"], "gav");
    assert_eq!(
        requests[0]["q"],
        SearchQuery::artifact_versions("io.ktor", "ktor-io").unwrap().to_string()
    );
    assert_eq!(requests[1]["start"], "2");
}

#[tokio::test]
async fn metadata_client_downloads_and_parses() {
    let (addr, _) = serve().await;
    let client = HttpMetadataClient::new(
        &MetadataConfig {
            repository_url: format!("http://{}/maven2/", addr),
            ..MetadataConfig::default()
        },
        None,
    )
    .unwrap();

    let meta = client
        .fetch_versions(&Coordinate::new("io.ktor", "ktor-io"))
        .await
        .unwrap();
    assert_eq!(meta.versions, vec!["2.3.0", "3.0.0"]);
    assert_eq!(meta.release.as_deref(), Some("3.0.0"));
    assert!(meta.last_updated.is_some());

    let err = client
        .fetch_versions(&Coordinate::new("io.ktor", "missing"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"), "{}", err);
}
