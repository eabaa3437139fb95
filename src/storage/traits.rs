//! Storage traits and error types
//!
//! This module defines the capability contract every storage backend
//! satisfies and the associated error types.

use crate::models::{Comment, Post, PostNeedingComments, User};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store returned HTTP {status} for {operation}: {body}")]
    Remote {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Capability contract shared by every storage backend
///
/// Upserts merge by primary key:
/// - posts: engagement counters are replaced, everything else is kept
/// - users: a field is replaced only by a non-null, non-empty value, except
///   `is_verified` which is always replaced
/// - comments: `likes` is replaced, everything else is kept
///
/// Implementations serialize access internally; callers issue one operation
/// at a time.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // ===== Upserts =====

    async fn upsert_post(&self, post: &Post) -> StorageResult<()>;

    async fn upsert_user(&self, user: &User) -> StorageResult<()>;

    async fn upsert_comment(&self, comment: &Comment) -> StorageResult<()>;

    // ===== Dedup and enrichment queries =====

    /// Codes of every stored post
    async fn get_existing_codes(&self) -> StorageResult<HashSet<String>>;

    /// Usernames with at least one known engagement counter
    async fn get_enriched_users(&self) -> StorageResult<HashSet<String>>;

    /// Total stored posts
    async fn get_post_count(&self) -> StorageResult<u64>;

    /// Posts with `comments_count > 0` and no stored comment, most liked first
    ///
    /// Backends without durable query capability may return an empty list.
    async fn get_posts_needing_comments(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<PostNeedingComments>>;

    // ===== Optional capabilities =====

    /// Whether `store_image` keeps media; callers skip downloads otherwise
    fn stores_media(&self) -> bool {
        false
    }

    /// Stores media bytes, returning where they can be found
    ///
    /// `None` means the backend keeps no media; callers skip, not fail.
    async fn store_image(&self, _bytes: &[u8], _filename: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    /// Flushes buffered records and releases resources
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
