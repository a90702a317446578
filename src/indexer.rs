//! The indexing step the drain job calls for each claimed request.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use kmp_indexer_core::models::IndexingRequest;
use kmp_indexer_core::queue::IndexingQueue;

/// Indexes one artifact version. Errors are per-request failures.
#[async_trait]
pub trait PackageIndexer: Send + Sync {
    async fn index(&self, request: &IndexingRequest) -> Result<()>;
}

/// Default indexer: records the version in the indexed-package store.
///
/// Fetching and analysing the artifact itself happens outside this crate;
/// deployments plug their own [`PackageIndexer`] into the drain job.
pub struct RecordingIndexer {
    queue: Arc<dyn IndexingQueue>,
}

impl RecordingIndexer {
    pub fn new(queue: Arc<dyn IndexingQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl PackageIndexer for RecordingIndexer {
    async fn index(&self, request: &IndexingRequest) -> Result<()> {
        tracing::info!(artifact = %request.artifact(), reindex = request.reindex, "indexed");
        self.queue.record_indexed(&request.artifact()).await
    }
}
