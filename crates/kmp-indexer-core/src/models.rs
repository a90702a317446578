//! Core data models shared by discovery, the indexing queue, and the jobs.
//!
//! These types describe artifacts as they flow from the upstream search API
//! through the queue to the indexer. All of them are plain values; none of
//! them know how they are stored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requests with this many failed attempts are never selected again.
pub const MAX_FAILED_ATTEMPTS: u32 = 2;

/// Upstream origin an artifact record was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScraperSource {
    MavenCentral,
    GoogleMaven,
}

impl ScraperSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperSource::MavenCentral => "maven_central",
            ScraperSource::GoogleMaven => "google_maven",
        }
    }
}

impl fmt::Display for ScraperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScraperSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maven_central" => Ok(ScraperSource::MavenCentral),
            "google_maven" => Ok(ScraperSource::GoogleMaven),
            other => anyhow::bail!(
                "Unknown scraper source: '{}'. Must be maven_central or google_maven.",
                other
            ),
        }
    }
}

/// A discovered artifact version.
///
/// `released_at` is absent when the source cannot tell (for example when
/// versions come from `maven-metadata.xml`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MavenArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub scraper_source: ScraperSource,
    pub released_at: Option<DateTime<Utc>>,
}

impl MavenArtifact {
    pub fn from_record(record: ArtifactRecord, source: ScraperSource) -> Self {
        Self {
            group_id: record.group_id,
            artifact_id: record.artifact_id,
            version: record.version,
            scraper_source: source,
            released_at: record.released_at,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
        }
    }
}

impl fmt::Display for MavenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// One record of a search result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub released_at: Option<DateTime<Utc>>,
}

/// A single page returned by a search backend.
///
/// `total_hits` is the server-reported number of matches for the whole
/// query; `current_hits` is the number of records on this page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPage {
    pub total_hits: u64,
    pub current_hits: u64,
    pub records: Vec<ArtifactRecord>,
}

impl SearchPage {
    pub fn new(total_hits: u64, records: Vec<ArtifactRecord>) -> Self {
        Self {
            total_hits,
            current_hits: records.len() as u64,
            records,
        }
    }
}

/// A `groupId:artifactId` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
}

impl Coordinate {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Parse a `groupId:artifactId` key.
    ///
    /// Returns `None` unless the key splits on `:` into exactly two
    /// non-empty parts. Parts are taken verbatim, whitespace included.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split(':');
        let group_id = parts.next()?;
        let artifact_id = parts.next()?;
        if parts.next().is_some() || group_id.is_empty() || artifact_id.is_empty() {
            return None;
        }
        Some(Self::new(group_id, artifact_id))
    }

    /// Repository-relative directory of this coordinate, e.g.
    /// `io/ktor/ktor-client-core`.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.group_id.replace('.', "/"), self.artifact_id)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

/// A queued request to index one artifact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingRequest {
    pub id: i64,
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub released_at: Option<DateTime<Utc>>,
    pub scraper_source: ScraperSource,
    pub reindex: bool,
    pub failed_attempts: u32,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

impl IndexingRequest {
    pub fn is_abandoned(&self) -> bool {
        self.failed_attempts >= MAX_FAILED_ATTEMPTS
    }

    pub fn artifact(&self) -> MavenArtifact {
        MavenArtifact {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: self.version.clone(),
            scraper_source: self.scraper_source,
            released_at: self.released_at,
        }
    }
}

/// A ban on a whole group (`artifact_id == None`) or one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BanRecord {
    pub group_id: String,
    pub artifact_id: Option<String>,
}

impl BanRecord {
    pub fn matches(&self, group_id: &str, artifact_id: &str) -> bool {
        self.group_id == group_id
            && self
                .artifact_id
                .as_deref()
                .map_or(true, |banned| banned == artifact_id)
    }
}

/// Queue population by lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Selectable requests (`failed_attempts < 2`), including claimed ones.
    pub pending: u64,
    /// Requests that exhausted their attempts and are never selected again.
    pub abandoned: u64,
    /// Requests currently held by a worker.
    pub claimed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_parse_accepts_exactly_two_parts() {
        let c = Coordinate::parse("io.ktor:ktor-client-core").unwrap();
        assert_eq!(c.group_id, "io.ktor");
        assert_eq!(c.artifact_id, "ktor-client-core");
        assert_eq!(c.to_string(), "io.ktor:ktor-client-core");
    }

    #[test]
    fn coordinate_parse_rejects_malformed_keys() {
        assert!(Coordinate::parse("io.ktor").is_none());
        assert!(Coordinate::parse("io.ktor:ktor-client-core:2.3.0").is_none());
        assert!(Coordinate::parse(":ktor-client-core").is_none());
        assert!(Coordinate::parse("io.ktor:").is_none());
        assert!(Coordinate::parse("").is_none());
    }

    #[test]
    fn coordinate_parse_keeps_parts_verbatim() {
        let c = Coordinate::parse(" io.ktor:ktor-io ").unwrap();
        assert_eq!(c.group_id, " io.ktor");
        assert_eq!(c.artifact_id, "ktor-io ");
    }

    #[test]
    fn repository_path_replaces_dots() {
        let c = Coordinate::new("org.jetbrains.kotlinx", "kotlinx-coroutines-core");
        assert_eq!(
            c.repository_path(),
            "org/jetbrains/kotlinx/kotlinx-coroutines-core"
        );
    }

    #[test]
    fn scraper_source_round_trips_through_str() {
        for source in [ScraperSource::MavenCentral, ScraperSource::GoogleMaven] {
            assert_eq!(source.as_str().parse::<ScraperSource>().unwrap(), source);
        }
        assert!("jcenter".parse::<ScraperSource>().is_err());
    }

    #[test]
    fn ban_record_without_artifact_bans_group() {
        let group_ban = BanRecord {
            group_id: "com.example".into(),
            artifact_id: None,
        };
        assert!(group_ban.matches("com.example", "anything"));
        assert!(!group_ban.matches("com.other", "anything"));

        let artifact_ban = BanRecord {
            group_id: "com.example".into(),
            artifact_id: Some("lib".into()),
        };
        assert!(artifact_ban.matches("com.example", "lib"));
        assert!(!artifact_ban.matches("com.example", "lib-extra"));
    }

    #[test]
    fn search_page_counts_records() {
        let page = SearchPage::new(
            10,
            vec![ArtifactRecord {
                group_id: "a".into(),
                artifact_id: "b".into(),
                version: "1".into(),
                released_at: None,
            }],
        );
        assert_eq!(page.current_hits, 1);
        assert_eq!(page.total_hits, 10);
    }
}
