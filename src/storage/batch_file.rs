//! Flat-file batch storage
//!
//! Records are buffered in memory and written as JSON arrays to timestamped
//! files, one file per entity type per flush:
//!
//! ```text
//! <output-dir>/posts_20240101_120000_000_1.json
//! <output-dir>/users_20240101_120000_000_2.json
//! <output-dir>/comments_20240101_120001_512_3.json
//! ```
//!
//! Files are never rewritten. Merges apply to records still buffered; a record
//! upserted again after its batch was flushed is written again in a later file.
//! Post codes and enriched usernames from earlier files are reloaded at open so
//! dedup survives restarts.

use crate::models::{Comment, Post, PostNeedingComments, User};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const POSTS: &str = "posts";
const USERS: &str = "users";
const COMMENTS: &str = "comments";

#[derive(Default)]
struct Buffers {
    posts: Vec<Post>,
    users: Vec<User>,
    comments: Vec<Comment>,
    codes: HashSet<String>,
    enriched: HashSet<String>,
    files_written: u64,
}

/// Append-only JSON batch writer
pub struct BatchFileStorage {
    output_dir: PathBuf,
    flush_threshold: usize,
    buffers: Mutex<Buffers>,
}

impl BatchFileStorage {
    /// Opens `output_dir`, creating it if needed, and reloads earlier batches
    pub fn new(output_dir: &Path, flush_threshold: usize) -> StorageResult<Self> {
        fs::create_dir_all(output_dir)?;

        let mut buffers = Buffers::default();
        for record in read_batches(output_dir, POSTS) {
            if let Some(code) = record.get("code").and_then(|c| c.as_str()) {
                if !code.is_empty() {
                    buffers.codes.insert(code.to_string());
                }
            }
        }
        for record in read_batches(output_dir, USERS) {
            if let Ok(user) = serde_json::from_value::<User>(record) {
                if user.is_enriched() {
                    buffers.enriched.insert(user.username);
                }
            }
        }

        tracing::info!(
            "JSON storage at {} ({} known posts, {} enriched users)",
            output_dir.display(),
            buffers.codes.len(),
            buffers.enriched.len()
        );

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            flush_threshold: flush_threshold.max(1),
            buffers: Mutex::new(buffers),
        })
    }

    fn buffers(&self) -> StorageResult<MutexGuard<'_, Buffers>> {
        self.buffers.lock().map_err(|_| StorageError::Poisoned)
    }

    fn write_batch<T: Serialize>(
        &self,
        kind: &str,
        records: &mut Vec<T>,
        files_written: &mut u64,
    ) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        *files_written += 1;
        let name = format!(
            "{}_{}_{}.json",
            kind,
            Local::now().format("%Y%m%d_%H%M%S_%3f"),
            files_written
        );
        let path = self.output_dir.join(name);
        fs::write(&path, serde_json::to_vec_pretty(records)?)?;
        tracing::info!("Flushed {} {} to {}", records.len(), kind, path.display());
        records.clear();
        Ok(())
    }

    fn flush_all(&self, buffers: &mut Buffers) -> StorageResult<()> {
        let Buffers {
            posts,
            users,
            comments,
            files_written,
            ..
        } = buffers;
        self.write_batch(POSTS, posts, files_written)?;
        self.write_batch(USERS, users, files_written)?;
        self.write_batch(COMMENTS, comments, files_written)?;
        Ok(())
    }
}

/// Records of every `<kind>_*.json` file; unreadable files are skipped
fn read_batches(dir: &Path, kind: &str) -> Vec<serde_json::Value> {
    let prefix = format!("{}_", kind);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_batch = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(&prefix) && n.ends_with(".json"))
            .unwrap_or(false);
        if !is_batch {
            continue;
        }
        let parsed = fs::read(&path)
            .map_err(StorageError::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<Vec<serde_json::Value>>(&bytes)?));
        match parsed {
            Ok(batch) => records.extend(batch),
            Err(e) => tracing::warn!("Skipping unreadable batch {}: {}", path.display(), e),
        }
    }
    records
}

#[async_trait]
impl Storage for BatchFileStorage {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn upsert_post(&self, post: &Post) -> StorageResult<()> {
        let mut guard = self.buffers()?;
        let buffers = &mut *guard;

        match buffers.posts.iter_mut().find(|p| p.code == post.code) {
            Some(buffered) => {
                buffered.likes = post.likes;
                buffered.comments_count = post.comments_count;
                buffered.views = post.views;
            }
            None => buffers.posts.push(post.clone()),
        }
        buffers.codes.insert(post.code.clone());

        if buffers.posts.len() >= self.flush_threshold {
            self.write_batch(POSTS, &mut buffers.posts, &mut buffers.files_written)?;
        }
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> StorageResult<()> {
        let mut guard = self.buffers()?;
        let buffers = &mut *guard;

        match buffers.users.iter_mut().find(|u| u.username == user.username) {
            Some(buffered) => buffered.merge(user),
            None => buffers.users.push(user.clone()),
        }
        if user.is_enriched() {
            buffers.enriched.insert(user.username.clone());
        }

        if buffers.users.len() >= self.flush_threshold {
            self.write_batch(USERS, &mut buffers.users, &mut buffers.files_written)?;
        }
        Ok(())
    }

    async fn upsert_comment(&self, comment: &Comment) -> StorageResult<()> {
        let mut guard = self.buffers()?;
        let buffers = &mut *guard;

        match buffers.comments.iter_mut().find(|c| c.id == comment.id) {
            Some(buffered) => buffered.likes = comment.likes,
            None => buffers.comments.push(comment.clone()),
        }

        if buffers.comments.len() >= self.flush_threshold {
            self.write_batch(COMMENTS, &mut buffers.comments, &mut buffers.files_written)?;
        }
        Ok(())
    }

    async fn get_existing_codes(&self) -> StorageResult<HashSet<String>> {
        Ok(self.buffers()?.codes.clone())
    }

    async fn get_enriched_users(&self) -> StorageResult<HashSet<String>> {
        Ok(self.buffers()?.enriched.clone())
    }

    async fn get_post_count(&self) -> StorageResult<u64> {
        Ok(self.buffers()?.codes.len() as u64)
    }

    async fn get_posts_needing_comments(
        &self,
        _limit: usize,
    ) -> StorageResult<Vec<PostNeedingComments>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> StorageResult<()> {
        let mut buffers = self.buffers()?;
        self.flush_all(&mut buffers)
    }
}
