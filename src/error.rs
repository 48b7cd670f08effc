//! Error taxonomy for the sync pipeline

use thiserror::Error;

/// Errors surfaced by the sync pipeline.
///
/// Only some of these fail a job: fetch and parse errors are recovered
/// locally by the phase that produced them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing credentials, username or criterion catalog
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A reference search request failed
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Fetching one item failed; the item is skipped
    #[error("failed to fetch {identifier}: {message}")]
    ItemFetch { identifier: String, message: String },

    /// The classification service kept signalling rate limits
    #[error("classification still rate limited after {attempts} retries")]
    RateLimitExhausted { attempts: u32 },

    /// The classification service failed for a reason other than rate limiting
    #[error("classification request failed: {0}")]
    Classification(String),

    /// The classification response could not be used
    #[error("malformed classification response: {0}")]
    ClassificationParse(String),

    /// Writing to or reading from the store failed
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl SyncError {
    /// Whether this error ends the job
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SyncError::ItemFetch { .. } | SyncError::ClassificationParse(_)
        )
    }

    /// Wrap a storage error
    pub fn persistence(err: anyhow::Error) -> Self {
        SyncError::Persistence(format!("{:#}", err))
    }
}
