//! Storage statistics
//!
//! This module extracts a summary of harvested data from any storage backend
//! and prints it.

use crate::storage::{Storage, StorageResult};

/// Upper bound when counting posts still waiting for comments
const PENDING_COMMENTS_SCAN: usize = 10_000;

/// Harvest statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestStatistics {
    /// Backend name
    pub backend: &'static str,

    /// Total stored posts as reported by the backend
    pub stored_posts: u64,

    /// Distinct post codes known to the backend
    pub unique_codes: usize,

    /// Users with a fetched profile
    pub enriched_users: usize,

    /// Posts with comments reported but none stored, capped at the scan limit
    pub pending_comment_threads: usize,
}

/// Loads statistics from storage
pub async fn load_statistics(storage: &dyn Storage) -> StorageResult<HarvestStatistics> {
    let stored_posts = storage.get_post_count().await?;
    let unique_codes = storage.get_existing_codes().await?.len();
    let enriched_users = storage.get_enriched_users().await?.len();
    let pending_comment_threads = storage
        .get_posts_needing_comments(PENDING_COMMENTS_SCAN)
        .await?
        .len();

    Ok(HarvestStatistics {
        backend: storage.name(),
        stored_posts,
        unique_codes,
        enriched_users,
        pending_comment_threads,
    })
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ({}) ===\n", stats.backend);
    println!("  Stored posts: {}", stats.stored_posts);
    println!("  Unique codes: {}", stats.unique_codes);
    println!("  Enriched users: {}", stats.enriched_users);

    let pending = if stats.pending_comment_threads >= PENDING_COMMENTS_SCAN {
        format!("{}+", PENDING_COMMENTS_SCAN)
    } else {
        stats.pending_comment_threads.to_string()
    };
    println!("  Posts awaiting comments: {}", pending);
}
