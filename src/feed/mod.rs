//! Feed client for the hashtag, comment and profile endpoints
//!
//! This module contains:
//! - Paginated hashtag and comment fetching with 429 backoff
//! - Raw payload normalization into typed records
//! - Shortcode to media id conversion
//!
//! Fetches never fail as a whole: whatever was collected before a failure is
//! returned together with the reason the walk ended.

mod client;
mod payload;
mod shortcode;

pub use client::{build_http_client, FeedClient};
pub use payload::{CommentsPage, ProfileResponse, RawMedia, SectionsPage};
pub use shortcode::{media_id_to_shortcode, shortcode_to_media_id, ALPHABET};

use std::fmt;
use thiserror::Error;

/// Errors raised by the feed layer itself
///
/// Transport and HTTP failures during pagination are not errors; they end the
/// walk and are reported through [`FetchEnd`].
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid shortcode: '{0}'")]
    InvalidShortcode(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Hashtag feed variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTab {
    /// Relevance-ranked
    Top,
    /// Recency-ordered
    Recent,
}

impl FeedTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Recent => "recent",
        }
    }
}

impl fmt::Display for FeedTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedTab {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top" => Ok(Self::Top),
            "recent" => Ok(Self::Recent),
            other => Err(format!("unknown tab '{}', expected 'top' or 'recent'", other)),
        }
    }
}

/// Why a paginated fetch stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEnd {
    /// The server reported no further pages
    Exhausted,

    /// The page budget was used up
    PageBudget,

    /// HTTP 429 persisted past the retry limit
    RateLimited,

    /// Transport failure or non-success status
    Failed(String),

    /// 401/403 or a non-JSON body: the session is no longer valid
    SessionInvalid(String),
}

impl FetchEnd {
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }
}

/// Records collected by a paginated fetch
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub pages: u32,
    pub end: FetchEnd,
}

impl<T> Fetched<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
