//! Long-running harvest daemon
//!
//! # State machine
//!
//! | State | Behavior |
//! |-------|----------|
//! | `Crawling` | Top-tab pass over shuffled hashtags, comment pass, recent-tab sample |
//! | `TargetReached` | Comment back-fill only, then a long pause |
//! | `Stopping` | Shutdown requested; the loop exits after the current hashtag |
//!
//! The stored-post count is re-read at every cycle start and before every
//! hashtag, so crawling stops without overshooting once the target is met.
//! Shutdown is observed at cycle start, before every hashtag, and during the
//! pauses between them.

mod pid;

pub use pid::PidFile;

use crate::config::{DaemonConfig, PacingConfig};
use crate::credentials::{CredentialSource, Credentials};
use crate::feed::FeedTab;
use crate::harvest::{HarvestError, Harvester};
use crate::pacing::{pause_unless_shutdown, DelayRange};
use rand::seq::SliceRandom;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Daemon lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Crawling,
    TargetReached,
    Stopping,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Crawling => "crawling",
            Self::TargetReached => "target-reached",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Outcome of one daemon cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    /// State the daemon was in when the cycle ended
    pub state: DaemonState,
    pub posts_stored: usize,
    pub comments_stored: usize,
    /// Hashtag or comment passes that raised an error
    pub failures: usize,
}

/// Supervised harvest loop
pub struct Daemon {
    config: DaemonConfig,
    pacing: PacingConfig,
    harvester: Harvester,
    source: Arc<dyn CredentialSource>,
    credentials: Arc<Credentials>,
    shutdown: watch::Receiver<bool>,
    state: DaemonState,
    cycle: u64,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        pacing: PacingConfig,
        harvester: Harvester,
        source: Arc<dyn CredentialSource>,
        credentials: Arc<Credentials>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            pacing,
            harvester,
            source,
            credentials,
            shutdown,
            state: DaemonState::Crawling,
            cycle: 0,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Credentials currently used for feed calls
    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Pauses for `range`; returns `true` and enters `Stopping` if shutdown
    /// was requested meanwhile
    async fn pause(&mut self, range: DelayRange) -> bool {
        if pause_unless_shutdown(&range, &mut self.shutdown).await {
            self.state = DaemonState::Stopping;
            return true;
        }
        false
    }

    /// Runs cycles until shutdown, then closes storage and removes the pid file
    pub async fn run(&mut self) -> crate::Result<()> {
        let pid_file = PidFile::create(&self.config.pid_file)?;
        tracing::info!(
            "Daemon started: {} hashtags, target {} posts, storage {}, session {}",
            self.config.hashtags.len(),
            self.config.target,
            self.harvester.storage().name(),
            self.credentials.session_hint()
        );

        while !self.stop_requested() {
            let report = self.run_cycle().await;
            tracing::info!(
                "Cycle {} finished ({}): {} posts, {} comments, {} failures",
                report.cycle,
                report.state,
                report.posts_stored,
                report.comments_stored,
                report.failures
            );
            if report.state == DaemonState::Stopping {
                break;
            }
        }

        self.state = DaemonState::Stopping;
        tracing::info!("Shutting down");
        if let Err(e) = self.harvester.storage().close().await {
            tracing::error!("Failed to close storage: {}", e);
        }
        drop(pid_file);
        Ok(())
    }

    /// Stored-post count, or `None` if it cannot be read
    async fn post_count(&self) -> Option<u64> {
        match self.harvester.storage().get_post_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!("Cannot read post count: {}", e);
                None
            }
        }
    }

    async fn target_reached(&self) -> bool {
        matches!(self.post_count().await, Some(count) if count >= self.config.target)
    }

    /// Runs one cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            state: self.state,
            posts_stored: 0,
            comments_stored: 0,
            failures: 0,
        };

        if self.stop_requested() {
            self.state = DaemonState::Stopping;
            report.state = self.state;
            return report;
        }

        let count = self.post_count().await;
        if matches!(count, Some(c) if c >= self.config.target) {
            self.target_reached_cycle(&mut report).await;
            report.state = self.state;
            return report;
        }

        self.state = DaemonState::Crawling;
        tracing::info!(
            "Cycle {}: {} / {} posts stored",
            self.cycle,
            count.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string()),
            self.config.target
        );

        self.crawling_cycle(&mut report).await;
        report.state = self.state;
        report
    }

    async fn target_reached_cycle(&mut self, report: &mut CycleReport) {
        if self.state != DaemonState::TargetReached {
            tracing::info!("Target of {} posts reached", self.config.target);
        }
        self.state = DaemonState::TargetReached;

        self.comment_pass(self.config.target_reached_comment_limit, report)
            .await;
        self.pause(self.pacing.target_reached).await;
    }

    async fn crawling_cycle(&mut self, report: &mut CycleReport) {
        let tags = {
            let mut tags: Vec<String> = self
                .config
                .hashtags
                .iter()
                .map(|t| t.trim_start_matches('#').to_string())
                .collect();
            tags.shuffle(&mut rand::thread_rng());
            tags
        };

        for (index, tag) in tags.iter().enumerate() {
            if self.stop_requested() {
                self.state = DaemonState::Stopping;
                return;
            }
            if self.target_reached().await {
                tracing::info!("Target reached mid-cycle, stopping hashtag pass");
                self.state = DaemonState::TargetReached;
                break;
            }

            tracing::info!("[{}/{}] #{} (top)", index + 1, tags.len(), tag);
            self.hashtag_pass(tag, FeedTab::Top, self.config.top_pages, report)
                .await;

            if self.pause(self.pacing.hashtag).await {
                return;
            }
        }

        // Comments are back-filled even when the top-tab pass hit the target
        self.comment_pass(self.config.comment_limit, report).await;

        if self.stop_requested() {
            self.state = DaemonState::Stopping;
            return;
        }
        if self.state == DaemonState::TargetReached || self.target_reached().await {
            self.state = DaemonState::TargetReached;
            return;
        }

        let sample: Vec<String> = {
            let mut rng = rand::thread_rng();
            self.config
                .hashtags
                .choose_multiple(&mut rng, self.config.recent_sample)
                .map(|t| t.trim_start_matches('#').to_string())
                .collect()
        };

        for tag in &sample {
            if self.stop_requested() {
                self.state = DaemonState::Stopping;
                return;
            }
            if self.target_reached().await {
                self.state = DaemonState::TargetReached;
                return;
            }

            tracing::info!("#{} (recent)", tag);
            self.hashtag_pass(tag, FeedTab::Recent, self.config.recent_pages, report)
                .await;

            if self.pause(self.pacing.recent_hashtag).await {
                return;
            }
        }

        if self.target_reached().await {
            self.state = DaemonState::TargetReached;
            return;
        }
        tracing::info!("Cycle {} complete, pausing before the next", self.cycle);
        self.pause(self.pacing.cycle).await;
    }

    async fn hashtag_pass(&mut self, tag: &str, tab: FeedTab, pages: u32, report: &mut CycleReport) {
        let result = self
            .harvester
            .scrape_hashtag(
                &self.credentials,
                tag,
                tab,
                pages,
                self.config.download_images,
                false,
            )
            .await;

        match result {
            Ok(stored) => report.posts_stored += stored,
            Err(e) => {
                report.failures += 1;
                self.handle_failure(&format!("#{} ({})", tag, tab), e).await;
            }
        }
    }

    async fn comment_pass(&mut self, limit: usize, report: &mut CycleReport) {
        match self
            .harvester
            .scrape_comments_batch(&self.credentials, limit)
            .await
        {
            Ok(stored) => report.comments_stored += stored,
            Err(e) => {
                report.failures += 1;
                self.handle_failure("comment pass", e).await;
            }
        }
    }

    /// Logs a failure and, for session expiry, refreshes credentials
    ///
    /// When the refresh fails the daemon waits `pacing.auth-failure`, then
    /// reloads the last persisted credentials.
    async fn handle_failure(&mut self, context: &str, error: HarvestError) {
        tracing::error!("{} failed: {}", context, error);
        if !error.is_auth_failure() {
            return;
        }

        tracing::warn!(
            "Session looks expired (credentials v{}), refreshing",
            self.credentials.version()
        );
        match self.source.refresh(&self.credentials).await {
            Ok(fresh) => {
                tracing::info!(
                    "Credentials refreshed (v{}, session {})",
                    fresh.version(),
                    fresh.session_hint()
                );
                self.credentials = fresh;
                return;
            }
            Err(e) => tracing::error!("Credential refresh failed: {}", e),
        }

        if self.pause(self.pacing.auth_failure).await {
            return;
        }
        match self.source.load().await {
            Ok(reloaded) => {
                tracing::info!("Reloaded credentials (session {})", reloaded.session_hint());
                self.credentials = reloaded;
            }
            Err(e) => tracing::error!("Credential reload failed, keeping current: {}", e),
        }
    }
}
