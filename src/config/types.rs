use crate::pacing::DelayRange;
use serde::Deserialize;

/// Main configuration structure for Tagminer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    pub storage: StorageConfig,
    pub credentials: CredentialsConfig,
    pub daemon: DaemonConfig,
}

/// Feed endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FeedConfig {
    /// Origin of the hashtag, comment and profile endpoints
    pub base_url: String,

    /// Application id sent with every API request
    pub app_id: String,

    /// Browser user agent presented to the API
    pub user_agent: String,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Consecutive 429 responses tolerated on a single page before giving
    /// up; 0 never gives up
    pub max_rate_limit_retries: u32,

    /// Comment pages fetched per post during back-fill
    pub comment_pages: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com".to_string(),
            app_id: "936619743392459".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
            timeout_secs: 15,
            max_rate_limit_retries: 0,
            comment_pages: 3,
        }
    }
}

/// Randomized delays used to pace request volume
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PacingConfig {
    /// Between successful hashtag feed pages
    pub page: DelayRange,

    /// Backoff after an HTTP 429
    pub rate_limit: DelayRange,

    /// Between comment pages of one post
    pub comment_page: DelayRange,

    /// Between stored posts
    pub post: DelayRange,

    /// Between profile enrichment calls
    pub enrichment: DelayRange,

    /// Between posts during comment back-fill
    pub comment_post: DelayRange,

    /// Between hashtags of the top-tab pass
    pub hashtag: DelayRange,

    /// Between hashtags of the recent-tab pass
    pub recent_hashtag: DelayRange,

    /// End-of-cycle pause while under target
    pub cycle: DelayRange,

    /// Re-check interval once the target is reached
    pub target_reached: DelayRange,

    /// Wait after a failed credential refresh
    pub auth_failure: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            page: DelayRange::millis(1_500, 3_000),
            rate_limit: DelayRange::millis(30_000, 60_000),
            comment_page: DelayRange::millis(1_000, 2_000),
            post: DelayRange::millis(300, 800),
            enrichment: DelayRange::millis(1_500, 3_000),
            comment_post: DelayRange::millis(1_500, 3_000),
            hashtag: DelayRange::millis(10_000, 25_000),
            recent_hashtag: DelayRange::millis(10_000, 20_000),
            cycle: DelayRange::millis(300_000, 600_000),
            target_reached: DelayRange::fixed_millis(3_600_000),
            auth_failure: DelayRange::fixed_millis(3_600_000),
        }
    }
}

impl PacingConfig {
    /// A pacing profile with every delay set to zero
    pub fn immediate() -> Self {
        let zero = DelayRange::fixed_millis(0);
        Self {
            page: zero,
            rate_limit: zero,
            comment_page: zero,
            post: zero,
            enrichment: zero,
            comment_post: zero,
            hashtag: zero,
            recent_hashtag: zero,
            cycle: zero,
            target_reached: zero,
            auth_failure: zero,
        }
    }

    pub(crate) fn ranges(&self) -> [(&'static str, &DelayRange); 11] {
        [
            ("page", &self.page),
            ("rate-limit", &self.rate_limit),
            ("comment-page", &self.comment_page),
            ("post", &self.post),
            ("enrichment", &self.enrichment),
            ("comment-post", &self.comment_post),
            ("hashtag", &self.hashtag),
            ("recent-hashtag", &self.recent_hashtag),
            ("cycle", &self.cycle),
            ("target-reached", &self.target_reached),
            ("auth-failure", &self.auth_failure),
        ]
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Embedded SQLite database
    Sqlite {
        path: String,
        /// Media directory; `images/` next to the database when unset
        #[serde(rename = "image-dir", default)]
        image_dir: Option<String>,
    },

    /// Buffered JSON files flushed in batches
    Json {
        #[serde(rename = "output-dir")]
        output_dir: String,
        #[serde(rename = "flush-threshold", default = "default_flush_threshold")]
        flush_threshold: usize,
    },

    /// Remote PostgREST-style service
    Rest {
        url: String,
        key: String,
        #[serde(default = "default_schema")]
        schema: String,
        #[serde(default)]
        bucket: Option<String>,
    },
}

fn default_flush_threshold() -> usize {
    100
}

fn default_schema() -> String {
    "public".to_string()
}

/// Session cookie source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialsConfig {
    /// JSON object of cookie name to value
    pub cookie_file: String,

    /// External command that rewrites the cookie file with a fresh session
    #[serde(default)]
    pub refresh_command: Option<Vec<String>>,
}

/// Long-running daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// Hashtags cycled by the daemon (without '#')
    pub hashtags: Vec<String>,

    /// Stored-post count at which new-post crawling stops
    #[serde(default = "default_target")]
    pub target: u64,

    #[serde(default = "default_true")]
    pub download_images: bool,

    /// Liveness marker holding the daemon pid
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    #[serde(default = "default_top_pages")]
    pub top_pages: u32,

    #[serde(default = "default_recent_pages")]
    pub recent_pages: u32,

    /// Hashtags sampled for the recent-tab pass
    #[serde(default = "default_recent_sample")]
    pub recent_sample: usize,

    #[serde(default = "default_comment_limit")]
    pub comment_limit: usize,

    #[serde(default = "default_target_reached_comment_limit")]
    pub target_reached_comment_limit: usize,
}

fn default_target() -> u64 {
    100_000
}

fn default_true() -> bool {
    true
}

fn default_pid_file() -> String {
    "tagminer_daemon.pid".to_string()
}

fn default_top_pages() -> u32 {
    20
}

fn default_recent_pages() -> u32 {
    10
}

fn default_recent_sample() -> usize {
    15
}

fn default_comment_limit() -> usize {
    300
}

fn default_target_reached_comment_limit() -> usize {
    500
}
