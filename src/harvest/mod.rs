//! Harvest orchestration
//!
//! This module mediates between the feed client and storage:
//! - `scrape_hashtag`: fetch, dedup against storage, persist, optionally
//!   download media and enrich authors
//! - `scrape_comments_batch`: back-fill comment threads for stored posts
//!
//! Per-record storage failures are logged and skipped. Only failures that make
//! the whole operation meaningless (the dedup snapshot cannot be read, the
//! session expired) are returned as errors.

mod harvester;

pub use harvester::Harvester;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that abort a harvest operation
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Storage query failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Session expired while fetching {context}: {reason}")]
    SessionExpired { context: String, reason: String },
}

impl HarvestError {
    /// Whether the feed session was rejected, so credentials need a refresh
    ///
    /// Storage failures never qualify, even when the remote store answers
    /// 401: its key is unrelated to the feed cookies.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::SessionExpired { .. } => true,
            Self::Storage(_) => false,
        }
    }
}
