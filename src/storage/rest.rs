//! Remote storage over a PostgREST-style API
//!
//! Tables: `ig_posts` (keyed by `code`), `ig_users` (keyed by `username`) and
//! `ig_comments` (keyed by `id`, `post_id` references `ig_posts.code`,
//! `username` references `ig_users.username`). Media goes to an optional
//! object-storage bucket on the same host.
//!
//! Merge policies map onto conflict resolution:
//! - posts and comments: insert with `resolution=ignore-duplicates`, then
//!   patch the mutable counters
//! - users: `resolution=merge-duplicates` with only the known fields sent

use crate::models::{Comment, Post, PostNeedingComments, User};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;

const POSTS_TABLE: &str = "ig_posts";
const USERS_TABLE: &str = "ig_users";
const COMMENTS_TABLE: &str = "ig_comments";

/// Rows per read request
const PAGE_SIZE: usize = 1000;

const IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=minimal";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=minimal";

/// PostgREST-backed storage
pub struct RestStorage {
    http: Client,
    base_url: String,
    key: String,
    schema: String,
    bucket: Option<String>,
}

#[derive(Deserialize)]
struct CodeRow {
    code: Option<String>,
}

#[derive(Deserialize)]
struct UsernameRow {
    username: String,
}

#[derive(Deserialize)]
struct PostIdRow {
    post_id: Option<String>,
}

#[derive(Deserialize)]
struct CandidateRow {
    code: String,
    comments_count: Option<i64>,
}

impl RestStorage {
    pub fn new(
        url: &str,
        key: &str,
        schema: &str,
        bucket: Option<String>,
    ) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        tracing::info!("REST storage: {} (schema={})", url, schema);
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            schema: schema.to_string(),
            bucket: bucket.filter(|b| !b.is_empty()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn read(&self, table: &str) -> RequestBuilder {
        self.authorized(self.http.get(self.table_url(table)))
            .header("Accept-Profile", &self.schema)
    }

    fn write(&self, request: RequestBuilder, prefer: &str) -> RequestBuilder {
        self.authorized(request)
            .header("Content-Profile", &self.schema)
            .header("Prefer", prefer)
    }

    async fn insert(&self, table: &str, row: Value, prefer: &str) -> StorageResult<()> {
        let request = self.write(self.http.post(self.table_url(table)), prefer);
        let response = request.json(&[row]).send().await?;
        check(response, &format!("insert {}", table)).await?;
        Ok(())
    }

    async fn patch(&self, table: &str, filter: (&str, String), fields: Value) -> StorageResult<()> {
        let request = self
            .write(self.http.patch(self.table_url(table)), "return=minimal")
            .query(&[filter]);
        let response = request.json(&fields).send().await?;
        check(response, &format!("update {}", table)).await?;
        Ok(())
    }

    /// Reads every row matching `query`, `PAGE_SIZE` rows at a time
    async fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> StorageResult<Vec<T>> {
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let limit = PAGE_SIZE.to_string();
            let start = offset.to_string();
            let response = self
                .read(table)
                .query(query)
                .query(&[("limit", limit.as_str()), ("offset", start.as_str())])
                .send()
                .await?;
            let batch: Vec<T> = check(response, &format!("select {}", table))
                .await?
                .json()
                .await?;
            let fetched = batch.len();
            rows.extend(batch);
            if fetched < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        Ok(rows)
    }

    /// Inserts a placeholder user so comment rows satisfy their foreign key
    async fn ensure_user(&self, username: &str) -> StorageResult<()> {
        self.insert(
            USERS_TABLE,
            json!({ "username": username, "is_verified": false }),
            IGNORE_DUPLICATES,
        )
        .await
    }
}

/// Maps a non-success response to `StorageError::Remote`
async fn check(response: Response, operation: &str) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Remote {
        operation: operation.to_string(),
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Total from a `Content-Range` header such as `0-0/1234` or `*/0`
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

fn post_row(post: &Post) -> Value {
    let username = Some(post.author.username.as_str()).filter(|u| !u.is_empty());
    json!({
        "id": post.code,
        "code": post.code,
        "username": username,
        "caption": post.caption,
        "hashtags": post.hashtags,
        "image_url": post.image_url,
        "storage_url": post.storage_url,
        "media_type": post.media_type.code(),
        "likes": post.likes,
        "comments_count": post.comments_count,
        "views": post.views,
        "location_name": post.location.name,
        "location_lat": post.location.lat,
        "location_lng": post.location.lng,
        "posted_at": post.posted_at.map(|t| t.to_rfc3339()),
        "word_count": post.word_count,
    })
}

/// Username, `is_verified`, and every other field that is known and non-empty
fn user_row(user: &User) -> Value {
    let mut row = Map::new();
    row.insert("username".to_string(), json!(user.username));
    row.insert("is_verified".to_string(), json!(user.is_verified));

    let text = [
        ("full_name", &user.full_name),
        ("bio", &user.bio),
        ("profile_pic_url", &user.profile_pic_url),
    ];
    for (field, value) in text {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            row.insert(field.to_string(), json!(value));
        }
    }

    let counters = [
        ("followers", user.followers),
        ("following", user.following),
        ("post_count", user.post_count),
    ];
    for (field, value) in counters {
        if let Some(value) = value {
            row.insert(field.to_string(), json!(value));
        }
    }
    if let Some(is_private) = user.is_private {
        row.insert("is_private".to_string(), json!(is_private));
    }

    Value::Object(row)
}

#[async_trait]
impl Storage for RestStorage {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn stores_media(&self) -> bool {
        self.bucket.is_some()
    }

    async fn upsert_post(&self, post: &Post) -> StorageResult<()> {
        self.insert(POSTS_TABLE, post_row(post), IGNORE_DUPLICATES)
            .await?;
        self.patch(
            POSTS_TABLE,
            ("code", format!("eq.{}", post.code)),
            json!({
                "likes": post.likes,
                "comments_count": post.comments_count,
                "views": post.views,
            }),
        )
        .await
    }

    async fn upsert_user(&self, user: &User) -> StorageResult<()> {
        self.insert(USERS_TABLE, user_row(user), MERGE_DUPLICATES)
            .await
    }

    async fn upsert_comment(&self, comment: &Comment) -> StorageResult<()> {
        let username = if comment.username.is_empty() {
            None
        } else {
            self.ensure_user(&comment.username).await?;
            Some(comment.username.as_str())
        };

        let row = json!({
            "id": comment.id,
            "post_id": comment.post_code,
            "username": username,
            "text": comment.text,
            "likes": comment.likes,
            "posted_at": comment.posted_at.map(|t| t.to_rfc3339()),
        });
        self.insert(COMMENTS_TABLE, row, IGNORE_DUPLICATES).await?;
        self.patch(
            COMMENTS_TABLE,
            ("id", format!("eq.{}", comment.id)),
            json!({ "likes": comment.likes }),
        )
        .await
    }

    async fn get_existing_codes(&self) -> StorageResult<HashSet<String>> {
        let rows: Vec<CodeRow> = self
            .select_all(POSTS_TABLE, &[("select", "code")])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.code)
            .filter(|c| !c.is_empty())
            .collect())
    }

    async fn get_enriched_users(&self) -> StorageResult<HashSet<String>> {
        let rows: Vec<UsernameRow> = self
            .select_all(
                USERS_TABLE,
                &[
                    ("select", "username"),
                    (
                        "or",
                        "(followers.not.is.null,following.not.is.null,post_count.not.is.null)",
                    ),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.username).collect())
    }

    async fn get_post_count(&self) -> StorageResult<u64> {
        let response = self
            .read(POSTS_TABLE)
            .query(&[("select", "code")])
            .header("Range-Unit", "items")
            .header("Range", "0-0")
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check(response, "count ig_posts").await?;
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0);
        Ok(total)
    }

    async fn get_posts_needing_comments(
        &self,
        limit: usize,
    ) -> StorageResult<Vec<PostNeedingComments>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let commented: HashSet<String> = self
            .select_all::<PostIdRow>(COMMENTS_TABLE, &[("select", "post_id")])
            .await?
            .into_iter()
            .filter_map(|r| r.post_id)
            .collect();

        let mut needing = Vec::new();
        let mut offset = 0;
        loop {
            let page_size = PAGE_SIZE.to_string();
            let start = offset.to_string();
            let response = self
                .read(POSTS_TABLE)
                .query(&[
                    ("select", "code,comments_count"),
                    ("comments_count", "gt.0"),
                    ("order", "likes.desc.nullslast"),
                    ("limit", page_size.as_str()),
                    ("offset", start.as_str()),
                ])
                .send()
                .await?;
            let batch: Vec<CandidateRow> = check(response, "select ig_posts")
                .await?
                .json()
                .await?;
            let fetched = batch.len();

            for row in batch {
                if commented.contains(&row.code) {
                    continue;
                }
                needing.push(PostNeedingComments {
                    code: row.code,
                    comments_count: row.comments_count.unwrap_or(0),
                });
                if needing.len() >= limit {
                    return Ok(needing);
                }
            }

            if fetched < PAGE_SIZE {
                return Ok(needing);
            }
            offset += PAGE_SIZE;
        }
    }

    async fn store_image(&self, bytes: &[u8], filename: &str) -> StorageResult<Option<String>> {
        let bucket = match &self.bucket {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        let public_url = format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, filename
        );

        let response = self
            .authorized(self.http.post(format!(
                "{}/storage/v1/object/{}/{}",
                self.base_url, bucket, filename
            )))
            .header("Content-Type", "image/jpeg")
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(Some(public_url));
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 400 && body.contains("Duplicate") {
            return Ok(Some(public_url));
        }
        Err(StorageError::Remote {
            operation: format!("upload {}", filename),
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}
