use serde::{Deserialize, Serialize};

/// A user profile
///
/// Counters are `None` when unknown, which is distinct from zero. A user seen
/// only as a post author is "minimal"; one whose profile was fetched is
/// "enriched".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub post_count: Option<i64>,
    pub is_verified: bool,
    pub is_private: Option<bool>,
    pub profile_pic_url: Option<String>,
}

impl User {
    /// A minimal record built from a post's author metadata
    pub fn minimal(username: impl Into<String>, full_name: &str, is_verified: bool) -> Self {
        Self {
            username: username.into(),
            full_name: non_empty(full_name),
            is_verified,
            ..Self::default()
        }
    }

    /// True once any engagement counter is known
    pub fn is_enriched(&self) -> bool {
        self.followers.is_some() || self.following.is_some() || self.post_count.is_some()
    }

    /// Folds `incoming` into `self` without downgrading known fields
    ///
    /// Every field is replaced only by a non-null, non-empty value, except
    /// `is_verified` which is always taken from `incoming`.
    pub fn merge(&mut self, incoming: &User) {
        merge_text(&mut self.full_name, &incoming.full_name);
        merge_text(&mut self.bio, &incoming.bio);
        merge_text(&mut self.profile_pic_url, &incoming.profile_pic_url);
        if incoming.followers.is_some() {
            self.followers = incoming.followers;
        }
        if incoming.following.is_some() {
            self.following = incoming.following;
        }
        if incoming.post_count.is_some() {
            self.post_count = incoming.post_count;
        }
        if incoming.is_private.is_some() {
            self.is_private = incoming.is_private;
        }
        self.is_verified = incoming.is_verified;
    }
}

fn merge_text(current: &mut Option<String>, incoming: &Option<String>) {
    if let Some(value) = incoming.as_deref().and_then(non_empty) {
        *current = Some(value);
    }
}

pub(crate) fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
