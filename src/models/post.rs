use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Media kind as reported by the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MediaType {
    Photo,
    Video,
    Carousel,
    Other(i64),
}

impl MediaType {
    pub fn code(&self) -> i64 {
        match self {
            Self::Photo => 1,
            Self::Video => 2,
            Self::Carousel => 8,
            Self::Other(code) => *code,
        }
    }
}

impl From<i64> for MediaType {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Photo,
            2 => Self::Video,
            8 => Self::Carousel,
            other => Self::Other(other),
        }
    }
}

impl From<MediaType> for i64 {
    fn from(media_type: MediaType) -> Self {
        media_type.code()
    }
}

impl Default for MediaType {
    fn default() -> Self {
        Self::Photo
    }
}

/// Author metadata carried inline with a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    pub full_name: String,
    pub is_verified: bool,
}

/// Geo-location attached to a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.lat.is_none() && self.lng.is_none()
    }
}

/// A harvested post
///
/// `code` is assigned by the origin and never changes. The engagement
/// counters are `None` when the server did not report them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub code: String,
    pub author: Author,
    pub caption: String,
    pub hashtags: Vec<String>,
    pub image_url: Option<String>,
    pub media_type: MediaType,
    pub likes: Option<i64>,
    pub comments_count: Option<i64>,
    pub views: Option<i64>,
    #[serde(default, skip_serializing_if = "Location::is_empty")]
    pub location: Location,
    pub posted_at: Option<DateTime<Utc>>,
    /// Where the media was stored, if it was retrieved
    pub storage_url: Option<String>,
    pub word_count: u32,
}

impl Post {
    /// Builds a post, deriving hashtags and word count from the caption
    pub fn new(code: impl Into<String>, author: Author, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        Self {
            code: code.into(),
            author,
            hashtags: extract_hashtags(&caption),
            word_count: word_count(&caption),
            caption,
            ..Self::default()
        }
    }

    /// Server-reported comment count, treating unknown as zero
    pub fn has_comments(&self) -> bool {
        self.comments_count.unwrap_or(0) > 0
    }
}

/// A stored post whose comment thread has not been fetched yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostNeedingComments {
    pub code: String,
    pub comments_count: i64,
}

fn hashtag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\w+)").expect("static hashtag pattern"))
}

/// Extracts `#tag` occurrences, without the `#`, in first-seen order
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    hashtag_pattern()
        .captures_iter(caption)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Counts whitespace-separated tokens
pub fn word_count(caption: &str) -> u32 {
    caption.split_whitespace().count() as u32
}
