//! Typed scrape errors carried over the error-reporting channel.
//!
//! Application plumbing uses `anyhow`; these are the failures a scan
//! survives and hands to an [`ErrorReporter`](crate::report::ErrorReporter)
//! instead of returning.

use kmp_indexer_core::query::QueryError;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// One search page failed; the scan moved on.
    #[error("search page {page} failed for query [{query}]: {source}")]
    Page {
        query: String,
        page: u32,
        #[source]
        source: BoxError,
    },

    /// Fetching or parsing the versions metadata of one coordinate failed.
    #[error("versions metadata for {coordinate} failed: {source}")]
    Coordinate {
        coordinate: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid search query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// A scan gave up after this many failed pages in a row.
    #[error("gave up on query [{query}] after {failures} consecutive failed pages")]
    TooManyFailures { query: String, failures: u32 },
}

impl ScrapeError {
    pub fn page(query: impl ToString, page: u32, err: anyhow::Error) -> Self {
        ScrapeError::Page {
            query: query.to_string(),
            page,
            source: err.into(),
        }
    }

    pub fn coordinate(coordinate: impl ToString, err: anyhow::Error) -> Self {
        ScrapeError::Coordinate {
            coordinate: coordinate.to_string(),
            source: err.into(),
        }
    }

    /// The query text this error refers to, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            ScrapeError::Page { query, .. } | ScrapeError::TooManyFailures { query, .. } => {
                Some(query)
            }
            _ => None,
        }
    }
}
