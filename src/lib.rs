//! Tagminer: an incremental hashtag feed harvester
//!
//! This crate walks hashtag feeds and comment threads of a paginated,
//! rate-limited content API and persists posts, users and comments
//! idempotently across runs and across pluggable storage backends.

pub mod config;
pub mod credentials;
pub mod daemon;
pub mod feed;
pub mod harvest;
pub mod models;
pub mod pacing;
pub mod stats;
pub mod storage;

use thiserror::Error;

/// Main error type for Tagminer operations
#[derive(Debug, Error)]
pub enum TagminerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credentials(#[from] credentials::CredentialError),

    #[error("Feed error: {0}")]
    Feed(#[from] feed::FeedError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Harvest error: {0}")]
    Harvest(#[from] harvest::HarvestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Tagminer operations
pub type Result<T> = std::result::Result<T, TagminerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use credentials::Credentials;
pub use daemon::{Daemon, DaemonState};
pub use feed::{shortcode_to_media_id, FeedClient, FeedTab};
pub use harvest::Harvester;
pub use models::{Comment, Post, User};
pub use storage::{open_storage, Storage};
