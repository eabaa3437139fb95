//! Session credentials
//!
//! The feed is authenticated by a bag of session cookies. A [`Credentials`]
//! value is immutable: a refresh produces a new value with a higher version,
//! which callers swap in wholesale. In-flight requests keep the value they
//! started with.

use crate::config::CredentialsConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Cookie that must be present for the session to be usable
pub const SESSION_COOKIE: &str = "sessionid";

/// Cookie mirrored into the CSRF header
pub const CSRF_COOKIE: &str = "csrftoken";

/// Errors that can occur while loading or refreshing credentials
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cookie file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cookie file is not a JSON object of strings: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Cookies are missing 'sessionid'")]
    MissingSession,

    #[error("Credential refresh command failed: {0}")]
    RefreshFailed(String),
}

/// An immutable, versioned bag of session cookies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    cookies: BTreeMap<String, String>,
    version: u64,
}

impl Credentials {
    /// Wraps a cookie bag, requiring a non-empty session cookie
    pub fn new(cookies: BTreeMap<String, String>) -> Result<Self, CredentialError> {
        Self::with_version(cookies, 1)
    }

    fn with_version(
        cookies: BTreeMap<String, String>,
        version: u64,
    ) -> Result<Self, CredentialError> {
        match cookies.get(SESSION_COOKIE) {
            Some(session) if !session.is_empty() => Ok(Self { cookies, version }),
            _ => Err(CredentialError::MissingSession),
        }
    }

    /// Produces the successor of `self` from a freshly loaded cookie bag
    pub fn succeed(&self, cookies: BTreeMap<String, String>) -> Result<Self, CredentialError> {
        Self::with_version(cookies, self.version + 1)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn csrf_token(&self) -> &str {
        self.get(CSRF_COOKIE).unwrap_or("")
    }

    /// Renders the `Cookie` request header value
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Last characters of the session id, safe to log
    pub fn session_hint(&self) -> String {
        let session = self.get(SESSION_COOKIE).unwrap_or("");
        let chars: Vec<char> = session.chars().collect();
        let start = chars.len().saturating_sub(8);
        format!("...{}", chars[start..].iter().collect::<String>())
    }
}

/// Reads a cookie bag from a JSON object file
pub fn read_cookie_file(path: &Path) -> Result<BTreeMap<String, String>, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Loads credentials from a cookie file
pub fn load_credentials(path: &Path) -> Result<Credentials, CredentialError> {
    let credentials = Credentials::new(read_cookie_file(path)?)?;
    tracing::info!(
        "Loaded cookies from {} (sessionid: {})",
        path.display(),
        credentials.session_hint()
    );
    Ok(credentials)
}

/// Where the daemon obtains and renews its session
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Loads the last persisted credentials
    async fn load(&self) -> Result<Arc<Credentials>, CredentialError>;

    /// Acquires a fresh session to replace `current`
    async fn refresh(&self, current: &Credentials) -> Result<Arc<Credentials>, CredentialError>;
}

/// Cookie file on disk, optionally renewed by an external command
///
/// Cookie extraction itself is left to the external command; after it exits
/// successfully the file is re-read.
#[derive(Debug, Clone)]
pub struct CookieFileSource {
    path: PathBuf,
    refresh_command: Option<Vec<String>>,
}

impl CookieFileSource {
    pub fn new(path: impl Into<PathBuf>, refresh_command: Option<Vec<String>>) -> Self {
        Self {
            path: path.into(),
            refresh_command,
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(&config.cookie_file, config.refresh_command.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run_refresh_command(&self, command: &[String]) -> Result<(), CredentialError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CredentialError::RefreshFailed("empty command".to_string()))?;

        tracing::info!("Running credential refresh command: {}", program);
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CredentialError::RefreshFailed(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::RefreshFailed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for CookieFileSource {
    async fn load(&self) -> Result<Arc<Credentials>, CredentialError> {
        Ok(Arc::new(load_credentials(&self.path)?))
    }

    async fn refresh(&self, current: &Credentials) -> Result<Arc<Credentials>, CredentialError> {
        if let Some(command) = &self.refresh_command {
            self.run_refresh_command(command).await?;
        }

        let cookies = read_cookie_file(&self.path)?;
        if self.refresh_command.is_none() && cookies == current.cookies {
            return Err(CredentialError::RefreshFailed(format!(
                "{} still holds the rejected session",
                self.path.display()
            )));
        }
        let refreshed = current.succeed(cookies)?;
        tracing::info!(
            "Refreshed cookies (version {}, sessionid: {})",
            refreshed.version(),
            refreshed.session_hint()
        );
        Ok(Arc::new(refreshed))
    }
}
