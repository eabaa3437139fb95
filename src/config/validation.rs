use crate::config::types::{
    Config, CredentialsConfig, DaemonConfig, FeedConfig, PacingConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_feed_config(&config.feed)?;
    validate_pacing_config(&config.pacing)?;
    validate_storage_config(&config.storage)?;
    validate_credentials_config(&config.credentials)?;
    validate_daemon_config(&config.daemon)?;
    Ok(())
}

fn validate_feed_config(config: &FeedConfig) -> Result<(), ConfigError> {
    validate_http_url("feed base-url", &config.base_url)?;

    if config.app_id.is_empty() {
        return Err(ConfigError::Validation("app-id cannot be empty".to_string()));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.comment_pages == 0 {
        return Err(ConfigError::Validation(
            "comment-pages must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    for (name, range) in config.ranges() {
        if range.min_ms > range.max_ms {
            return Err(ConfigError::Validation(format!(
                "pacing.{} has min-ms {} greater than max-ms {}",
                name, range.min_ms, range.max_ms
            )));
        }
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    match config {
        StorageConfig::Sqlite { path, .. } => {
            if path.is_empty() {
                return Err(ConfigError::Validation(
                    "sqlite path cannot be empty".to_string(),
                ));
            }
        }
        StorageConfig::Json {
            output_dir,
            flush_threshold,
        } => {
            if output_dir.is_empty() {
                return Err(ConfigError::Validation(
                    "json output-dir cannot be empty".to_string(),
                ));
            }
            if *flush_threshold == 0 {
                return Err(ConfigError::Validation(
                    "json flush-threshold must be >= 1".to_string(),
                ));
            }
        }
        StorageConfig::Rest { url, key, .. } => {
            validate_http_url("rest url", url)?;
            if key.is_empty() {
                return Err(ConfigError::Validation(
                    "rest key cannot be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn validate_credentials_config(config: &CredentialsConfig) -> Result<(), ConfigError> {
    if config.cookie_file.is_empty() {
        return Err(ConfigError::Validation(
            "cookie-file cannot be empty".to_string(),
        ));
    }

    if let Some(command) = &config.refresh_command {
        if command.is_empty() || command[0].is_empty() {
            return Err(ConfigError::Validation(
                "refresh-command must name a program".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_daemon_config(config: &DaemonConfig) -> Result<(), ConfigError> {
    if config.hashtags.is_empty() {
        return Err(ConfigError::Validation(
            "daemon hashtags cannot be empty".to_string(),
        ));
    }

    for tag in &config.hashtags {
        let tag = tag.trim_start_matches('#');
        if tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "invalid hashtag '{}'",
                tag
            )));
        }
    }

    if config.target == 0 {
        return Err(ConfigError::Validation("target must be >= 1".to_string()));
    }

    if config.top_pages == 0 || config.recent_pages == 0 {
        return Err(ConfigError::Validation(format!(
            "page budgets must be >= 1, got top-pages={} recent-pages={}",
            config.top_pages, config.recent_pages
        )));
    }

    if config.pid_file.is_empty() {
        return Err(ConfigError::Validation(
            "pid-file cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}
