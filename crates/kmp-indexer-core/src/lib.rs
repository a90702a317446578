//! # kmp-indexer core
//!
//! Shared, I/O-free logic for kmp-indexer: artifact and queue models,
//! search query construction, the backoff delay policy, and the
//! [`queue::IndexingQueue`] abstraction with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Anything that
//! talks to the network or a database lives in the `kmp-indexer` crate.

pub mod backoff;
pub mod models;
pub mod query;
pub mod queue;
