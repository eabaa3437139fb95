//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! Merge policies are expressed directly in the `ON CONFLICT` clauses.

use crate::models::{Author, Comment, Location, MediaType, Post, PostNeedingComments, User};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    image_dir: Option<PathBuf>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// Media is written under `image_dir` when one is given; otherwise
    /// `store_image` reports that no media is kept.
    pub fn new(path: &Path, image_dir: Option<PathBuf>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            image_dir,
        })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            image_dir: None,
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Loads a stored post by code
    pub fn get_post(&self, code: &str) -> StorageResult<Option<Post>> {
        let conn = self.conn()?;
        let post = conn
            .query_row(
                "SELECT p.code, p.username, u.full_name, u.is_verified, p.caption, p.hashtags,
                        p.image_url, p.storage_url, p.media_type, p.likes, p.comments_count,
                        p.views, p.location_name, p.location_lat, p.location_lng, p.posted_at,
                        p.word_count
                 FROM posts p LEFT JOIN users u ON u.username = p.username
                 WHERE p.code = ?1",
                params![code],
                post_from_row,
            )
            .optional()?;
        Ok(post)
    }

    /// Loads a stored user by username
    pub fn get_user(&self, username: &str) -> StorageResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT username, full_name, bio, followers, following, post_count,
                        is_verified, is_private, profile_pic_url
                 FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        username: row.get(0)?,
                        full_name: row.get(1)?,
                        bio: row.get(2)?,
                        followers: row.get(3)?,
                        following: row.get(4)?,
                        post_count: row.get(5)?,
                        is_verified: row.get(6)?,
                        is_private: row.get(7)?,
                        profile_pic_url: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Loads the stored comments of a post, most liked first
    pub fn get_comments(&self, post_code: &str) -> StorageResult<Vec<Comment>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, post_code, username, text, likes, posted_at
             FROM comments WHERE post_code = ?1 ORDER BY likes DESC, id",
        )?;
        let comments = stmt
            .query_map(params![post_code], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    post_code: row.get(1)?,
                    username: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    text: row.get(3)?,
                    likes: row.get(4)?,
                    posted_at: parse_timestamp(row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let hashtags: String = row.get(5)?;
    Ok(Post {
        code: row.get(0)?,
        author: Author {
            username: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            full_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            is_verified: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
        },
        caption: row.get(4)?,
        hashtags: serde_json::from_str(&hashtags).unwrap_or_default(),
        image_url: row.get(6)?,
        storage_url: row.get(7)?,
        media_type: MediaType::from(row.get::<_, i64>(8)?),
        likes: row.get(9)?,
        comments_count: row.get(10)?,
        views: row.get(11)?,
        location: Location {
            name: row.get(12)?,
            lat: row.get(13)?,
            lng: row.get(14)?,
        },
        posted_at: parse_timestamp(row.get(15)?),
        word_count: row.get(16)?,
    })
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn empty_to_null(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn stores_media(&self) -> bool {
        self.image_dir.is_some()
    }

    // ===== Upserts =====

    async fn upsert_post(&self, post: &Post) -> StorageResult<()> {
        let hashtags = serde_json::to_string(&post.hashtags)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO posts (code, username, caption, hashtags, image_url, storage_url,
                                media_type, likes, comments_count, views, location_name,
                                location_lat, location_lng, posted_at, scraped_at, word_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(code) DO UPDATE SET
                likes = excluded.likes,
                comments_count = excluded.comments_count,
                views = excluded.views,
                storage_url = COALESCE(posts.storage_url, excluded.storage_url)",
            params![
                post.code,
                empty_to_null(&post.author.username),
                post.caption,
                hashtags,
                post.image_url,
                post.storage_url,
                post.media_type.code(),
                post.likes,
                post.comments_count,
                post.views,
                post.location.name,
                post.location.lat,
                post.location.lng,
                post.posted_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                post.word_count,
            ],
        )?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, full_name, bio, followers, following, post_count,
                                is_verified, is_private, profile_pic_url, scraped_at)
             VALUES (?1, NULLIF(?2, ''), NULLIF(?3, ''), ?4, ?5, ?6, ?7, ?8, NULLIF(?9, ''), ?10)
             ON CONFLICT(username) DO UPDATE SET
                full_name = COALESCE(excluded.full_name, users.full_name),
                bio = COALESCE(excluded.bio, users.bio),
                followers = COALESCE(excluded.followers, users.followers),
                following = COALESCE(excluded.following, users.following),
                post_count = COALESCE(excluded.post_count, users.post_count),
                is_verified = excluded.is_verified,
                is_private = COALESCE(excluded.is_private, users.is_private),
                profile_pic_url = COALESCE(excluded.profile_pic_url, users.profile_pic_url),
                scraped_at = excluded.scraped_at",
            params![
                user.username,
                user.full_name,
                user.bio,
                user.followers,
                user.following,
                user.post_count,
                user.is_verified,
                user.is_private,
                user.profile_pic_url,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn upsert_comment(&self, comment: &Comment) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO comments (id, post_code, username, text, likes, posted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET likes = excluded.likes",
            params![
                comment.id,
                comment.post_code,
                empty_to_null(&comment.username),
                comment.text,
                comment.likes,
                comment.posted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    // ===== Queries =====

    async fn get_existing_codes(&self) -> StorageResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT code FROM posts")?;
        let codes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(codes)
    }

    async fn get_enriched_users(&self) -> StorageResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT username FROM users
             WHERE followers IS NOT NULL OR following IS NOT NULL OR post_count IS NOT NULL",
        )?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(users)
    }

    async fn get_post_count(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn get_posts_needing_comments(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<PostNeedingComments>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.code, p.comments_count FROM posts p
             WHERE p.comments_count > 0
               AND NOT EXISTS (SELECT 1 FROM comments c WHERE c.post_code = p.code)
             ORDER BY p.likes DESC
             LIMIT ?1",
        )?;
        let posts = stmt
            .query_map(params![limit as i64], |row| {
                Ok(PostNeedingComments {
                    code: row.get(0)?,
                    comments_count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    // ===== Media =====

    async fn store_image(&self, bytes: &[u8], filename: &str) -> StorageResult<Option<String>> {
        let dir = match &self.image_dir {
            Some(dir) => dir,
            None => return Ok(None),
        };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(Some(path.to_string_lossy().into_owned()))
    }
}
