//! Raw feed payloads and their normalization into records
//!
//! The payload structs mirror only the fields the harvester reads. Every field
//! is optional on the wire; absent values become `None` or empty defaults.

use crate::models::{Author, Comment, Location, MediaType, Post, User};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One page of a hashtag feed
#[derive(Debug, Default, Deserialize)]
pub struct SectionsPage {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub more_available: bool,
    pub next_max_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub layout_content: LayoutContent,
}

#[derive(Debug, Default, Deserialize)]
pub struct LayoutContent {
    #[serde(default)]
    pub medias: Vec<MediaEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaEntry {
    pub media: Option<RawMedia>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMedia {
    pub code: Option<String>,
    pub user: Option<RawMediaUser>,
    pub caption: Option<RawCaption>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub play_count: Option<i64>,
    pub view_count: Option<i64>,
    pub media_type: Option<i64>,
    pub image_versions2: Option<ImageVersions>,
    pub location: Option<RawLocation>,
    pub taken_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMediaUser {
    pub username: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCaption {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<ImageCandidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageCandidate {
    pub url: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLocation {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl SectionsPage {
    /// All media entries on the page, in order
    pub fn medias(&self) -> impl Iterator<Item = &RawMedia> {
        self.sections
            .iter()
            .flat_map(|section| section.layout_content.medias.iter())
            .filter_map(|entry| entry.media.as_ref())
    }
}

impl RawMedia {
    /// Normalizes a media entry; entries without a code are dropped
    pub fn to_post(&self) -> Option<Post> {
        let code = self.code.as_deref().filter(|c| !c.is_empty())?;

        let user = self.user.as_ref();
        let author = Author {
            username: user.and_then(|u| u.username.clone()).unwrap_or_default(),
            full_name: user.and_then(|u| u.full_name.clone()).unwrap_or_default(),
            is_verified: user.map(|u| u.is_verified).unwrap_or(false),
        };
        let caption = self
            .caption
            .as_ref()
            .and_then(|c| c.text.clone())
            .unwrap_or_default();

        let mut post = Post::new(code, author, caption);
        post.image_url = self.best_image().and_then(|c| c.url.clone());
        post.media_type = self.media_type.map(MediaType::from).unwrap_or_default();
        post.likes = self.like_count;
        post.comments_count = self.comment_count;
        post.views = self.play_count.or(self.view_count);
        post.location = self
            .location
            .as_ref()
            .map(|l| Location {
                name: l.name.clone(),
                lat: l.lat,
                lng: l.lng,
            })
            .unwrap_or_default();
        post.posted_at = self.taken_at.and_then(from_unix);
        Some(post)
    }

    /// The widest image candidate
    fn best_image(&self) -> Option<&ImageCandidate> {
        self.image_versions2
            .as_ref()?
            .candidates
            .iter()
            .max_by_key(|c| c.width)
    }
}

/// One page of a comment thread
#[derive(Debug, Default, Deserialize)]
pub struct CommentsPage {
    #[serde(default)]
    pub comments: Vec<RawComment>,
    #[serde(default)]
    pub has_more_comments: bool,
    pub next_min_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawComment {
    pub pk: Option<serde_json::Value>,
    pub user: Option<RawCommentUser>,
    pub text: Option<String>,
    pub comment_like_count: Option<i64>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCommentUser {
    pub username: Option<String>,
}

impl RawComment {
    /// Normalizes a comment; comments without an id are dropped
    pub fn to_comment(&self, post_code: &str) -> Option<Comment> {
        let id = match self.pk.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };

        Some(Comment {
            id,
            post_code: post_code.to_string(),
            username: self
                .user
                .as_ref()
                .and_then(|u| u.username.clone())
                .unwrap_or_default(),
            text: self.text.clone().unwrap_or_default(),
            likes: self.comment_like_count.unwrap_or(0),
            posted_at: self.created_at.and_then(from_unix),
        })
    }
}

/// Profile endpoint response
#[derive(Debug, Default, Deserialize)]
pub struct ProfileResponse {
    pub data: Option<ProfileData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileData {
    pub user: Option<RawProfile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawProfile {
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub edge_followed_by: Option<EdgeCount>,
    pub edge_follow: Option<EdgeCount>,
    pub edge_owner_to_timeline_media: Option<EdgeCount>,
    #[serde(default)]
    pub is_verified: bool,
    pub is_private: Option<bool>,
    pub profile_pic_url: Option<String>,
    pub profile_pic_url_hd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EdgeCount {
    pub count: Option<i64>,
}

impl ProfileResponse {
    pub fn into_user(self, username: &str) -> Option<User> {
        let raw = self.data?.user?;
        Some(User {
            username: username.to_string(),
            full_name: raw.full_name.filter(|s| !s.is_empty()),
            bio: raw.biography.filter(|s| !s.is_empty()),
            followers: raw.edge_followed_by.and_then(|e| e.count),
            following: raw.edge_follow.and_then(|e| e.count),
            post_count: raw.edge_owner_to_timeline_media.and_then(|e| e.count),
            is_verified: raw.is_verified,
            is_private: raw.is_private,
            profile_pic_url: raw
                .profile_pic_url_hd
                .or(raw.profile_pic_url)
                .filter(|s| !s.is_empty()),
        })
    }
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}
