use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment on a post
///
/// Only `likes` may change after the comment is first stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Code of the owning post
    pub post_code: String,
    pub username: String,
    pub text: String,
    pub likes: i64,
    pub posted_at: Option<DateTime<Utc>>,
}
