//! `maven-metadata.xml` download and parsing.
//!
//! The versions metadata document lists every published version of one
//! `groupId:artifactId`. It lives at
//! `{repository}/{group as path}/{artifact}/maven-metadata.xml`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;

use kmp_indexer_core::models::Coordinate;

use crate::config::MetadataConfig;
use crate::rate_limit::{acquire_and_run, RequestLimiter};

/// Parsed versions metadata of one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionsMetadata {
    pub group_id: String,
    pub artifact_id: String,
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Source of versions metadata documents.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch_versions(&self, coordinate: &Coordinate) -> Result<VersionsMetadata>;
}

/// Fetches metadata over HTTP from a Maven repository.
pub struct HttpMetadataClient {
    http: reqwest::Client,
    repository_url: String,
    limiter: Option<Arc<dyn RequestLimiter>>,
}

impl HttpMetadataClient {
    pub fn new(config: &MetadataConfig, limiter: Option<Arc<dyn RequestLimiter>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("kmp-indexer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            repository_url: config.repository_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    pub fn metadata_url(&self, coordinate: &Coordinate) -> String {
        format!(
            "{}/{}/maven-metadata.xml",
            self.repository_url,
            coordinate.repository_path()
        )
    }

    async fn download(&self, url: &str) -> Result<VersionsMetadata> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        let body = response.bytes().await?;
        parse_versions_metadata(&body).with_context(|| format!("Malformed metadata at {}", url))
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn fetch_versions(&self, coordinate: &Coordinate) -> Result<VersionsMetadata> {
        let url = self.metadata_url(coordinate);
        tracing::debug!(%coordinate, url = %url, "fetching versions metadata");
        match &self.limiter {
            Some(limiter) => acquire_and_run(limiter.as_ref(), || self.download(&url)).await,
            None => self.download(&url).await,
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    GroupId,
    ArtifactId,
    Latest,
    Release,
    Version,
    LastUpdated,
}

/// Parse a `maven-metadata.xml` document.
///
/// Only `metadata/groupId`, `metadata/artifactId` and the `versioning`
/// block are read; anything else (plugin lists, snapshot info) is ignored.
pub fn parse_versions_metadata(xml: &[u8]) -> Result<VersionsMetadata> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Field> = None;
    let mut meta = VersionsMetadata::default();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                path.push(name);
                current = match path_str(&path).as_slice() {
                    [b"metadata"] => {
                        saw_root = true;
                        None
                    }
                    [b"metadata", b"groupId"] => Some(Field::GroupId),
                    [b"metadata", b"artifactId"] => Some(Field::ArtifactId),
                    [b"metadata", b"versioning", b"latest"] => Some(Field::Latest),
                    [b"metadata", b"versioning", b"release"] => Some(Field::Release),
                    [b"metadata", b"versioning", b"lastUpdated"] => Some(Field::LastUpdated),
                    [b"metadata", b"versioning", b"versions", b"version"] => Some(Field::Version),
                    _ => None,
                };
            }
            Ok(Event::Text(te)) => {
                if let Some(field) = current {
                    let text = te.unescape()?.trim().to_string();
                    if !text.is_empty() {
                        assign(&mut meta, field, text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("XML error at position {}: {}", reader.buffer_position(), e),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        bail!("Not a maven-metadata document: missing <metadata> root");
    }
    Ok(meta)
}

fn path_str(path: &[Vec<u8>]) -> Vec<&[u8]> {
    path.iter().map(|p| p.as_slice()).collect()
}

fn assign(meta: &mut VersionsMetadata, field: Field, text: String) {
    match field {
        Field::GroupId => meta.group_id = text,
        Field::ArtifactId => meta.artifact_id = text,
        Field::Latest => meta.latest = Some(text),
        Field::Release => meta.release = Some(text),
        Field::Version => meta.versions.push(text),
        // yyyyMMddHHmmss, UTC
        Field::LastUpdated => {
            meta.last_updated = NaiveDateTime::parse_from_str(&text, "%Y%m%d%H%M%S")
                .ok()
                .map(|dt| dt.and_utc())
        }
    }
}
