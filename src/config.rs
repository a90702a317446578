//! TOML configuration.
//!
//! Only `[db]` is required; every other section has defaults suitable for
//! indexing Maven Central.
//!
//! ```toml
//! [db]
//! path = "./data/kmpi.sqlite"
//!
//! [search]
//! base_url = "https://search.maven.org"
//! page_size = 200
//! kmp_terms = ["l:kotlin-tooling-metadata"]
//!
//! [rate_limit]
//! capacity = 5
//! refill_amount = 5
//! refill_period_ms = 1000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use kmp_indexer_core::models::ScraperSource;
use kmp_indexer_core::query::{SearchQuery, Term};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// `field:value` terms ANDed together to find KMP artifacts.
    #[serde(default = "default_kmp_terms")]
    pub kmp_terms: Vec<String>,
    #[serde(default = "default_source")]
    pub source: ScraperSource,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            kmp_terms: default_kmp_terms(),
            source: default_source(),
        }
    }
}

impl SearchConfig {
    /// Build the discovery query from `kmp_terms`.
    pub fn kmp_query(&self) -> Result<SearchQuery> {
        let mut terms = Vec::with_capacity(self.kmp_terms.len());
        for raw in &self.kmp_terms {
            let (field, value) = raw
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("search.kmp_terms entry '{}' is not field:value", raw))?;
            terms.push(Term::new(field.trim(), value.trim()));
        }
        SearchQuery::and(terms).context("Invalid search.kmp_terms")
    }
}

fn default_search_base_url() -> String {
    "https://search.maven.org".to_string()
}
fn default_page_size() -> u32 {
    200
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_kmp_terms() -> Vec<String> {
    vec!["l:kotlin-tooling-metadata".to_string()]
}
fn default_source() -> ScraperSource {
    ScraperSource::MavenCentral
}

/// Token bucket settings for outbound search requests.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_amount")]
    pub refill_amount: u32,
    #[serde(default = "default_refill_period_ms")]
    pub refill_period_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            refill_amount: default_refill_amount(),
            refill_period_ms: default_refill_period_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_capacity() -> u32 {
    5
}
fn default_refill_amount() -> u32 {
    5
}
fn default_refill_period_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    #[serde(default = "default_repository_url")]
    pub repository_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Route metadata downloads through the search rate limiter.
    #[serde(default)]
    pub rate_limited: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            repository_url: default_repository_url(),
            timeout_secs: default_timeout_secs(),
            rate_limited: false,
        }
    }
}

fn default_repository_url() -> String {
    "https://repo1.maven.org/maven2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            drain_batch_size: default_drain_batch_size(),
        }
    }
}

fn default_lease_secs() -> i64 {
    600
}
fn default_drain_batch_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_consecutive_page_failures")]
    pub max_consecutive_page_failures: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_consecutive_page_failures: default_max_consecutive_page_failures(),
        }
    }
}

fn default_max_consecutive_page_failures() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_discover_interval_secs")]
    pub discover_interval_secs: u64,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            discover_interval_secs: default_discover_interval_secs(),
            drain_interval_secs: default_drain_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_discover_interval_secs() -> u64 {
    900
}
fn default_drain_interval_secs() -> u64 {
    60
}
fn default_refresh_interval_secs() -> u64 {
    6 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `auto`, `pretty`, or `json`. `auto` picks pretty on a TTY.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint, e.g. `127.0.0.1:9464`.
    #[serde(default)]
    pub listen: Option<String>,
}

impl Config {
    /// Configuration with every default and the given database path.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            search: SearchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metadata: MetadataConfig::default(),
            queue: QueueConfig::default(),
            scan: ScanConfig::default(),
            jobs: JobsConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.search.page_size == 0 {
        anyhow::bail!("search.page_size must be > 0");
    }
    config.search.kmp_query()?;

    if config.rate_limit.enabled {
        if config.rate_limit.capacity == 0 {
            anyhow::bail!("rate_limit.capacity must be > 0");
        }
        if config.rate_limit.refill_amount == 0 {
            anyhow::bail!("rate_limit.refill_amount must be > 0");
        }
        if config.rate_limit.refill_period_ms == 0 {
            anyhow::bail!("rate_limit.refill_period_ms must be > 0");
        }
    }

    if config.queue.lease_secs < 1 {
        anyhow::bail!("queue.lease_secs must be >= 1");
    }
    if config.queue.drain_batch_size == 0 {
        anyhow::bail!("queue.drain_batch_size must be > 0");
    }
    if config.scan.max_consecutive_page_failures == 0 {
        anyhow::bail!("scan.max_consecutive_page_failures must be > 0");
    }

    match config.logging.format.as_str() {
        "auto" | "pretty" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging.format: '{}'. Must be auto, pretty, or json.",
            other
        ),
    }

    Ok(())
}
