//! # KMP Indexer
//!
//! Discovery and indexing backend for Kotlin Multiplatform libraries
//! published to Maven repositories.
//!
//! The pipeline finds KMP artifacts through a paged search API, queues them
//! in SQLite, and drains the queue through a pluggable indexer. Outbound
//! search traffic goes through a shared token bucket; failing queue entries
//! are retried under per-id exponential backoff and abandoned after two
//! failed attempts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐   ┌───────────┐
//! │ RateLimiter  │◀──│ SearchClient│◀──│  Scraper  │──▶│   Queue   │
//! │ token bucket │   │ Metadata    │   │ 3 scans   │   │  SQLite   │
//! └──────────────┘   └─────────────┘   └───────────┘   └─────┬─────┘
//!                                                            │ claim
//!                                      ┌───────────┐   ┌─────▼─────┐
//!                                      │  Backoff  │◀──│   Drain   │
//!                                      │ per id    │   │  Indexer  │
//!                                      └───────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kmpi init                        # create database
//! kmpi discover                    # queue new KMP artifacts
//! kmpi drain --limit 100           # index queued requests
//! kmpi worker                      # run every job on its interval
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`rate_limit`] | Token bucket and unlimited request gates |
//! | [`search_client`] | Paged search API client |
//! | [`metadata`] | `maven-metadata.xml` client and parser |
//! | [`scraper`] | Discovery, version enumeration and metadata diff scans |
//! | [`report`] | Error-reporting channel for scans |
//! | [`error`] | Typed scrape errors |
//! | [`sqlite_queue`] | SQLite indexing queue |
//! | [`backoff`] | Per-id exponential backoff |
//! | [`indexer`] | Indexing step used by the drain job |
//! | [`jobs`] | Discover, refresh, and drain jobs |
//! | [`scheduler`] | Fixed-rate job scheduler |
//! | [`commands`] | CLI command implementations |
//! | [`stats`] | Queue health summary |
//! | [`telemetry`] | Logging and metrics setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backoff;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod jobs;
pub mod metadata;
pub mod migrate;
pub mod rate_limit;
pub mod report;
pub mod scheduler;
pub mod scraper;
pub mod search_client;
pub mod sqlite_queue;
pub mod stats;
pub mod telemetry;

pub use kmp_indexer_core::{models, query, queue};
