//! Configuration module for Tagminer
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use tagminer::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tagminer.toml")).unwrap();
//! println!("Daemon target: {} posts", config.daemon.target);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CredentialsConfig, DaemonConfig, FeedConfig, PacingConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
