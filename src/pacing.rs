//! Randomized pacing delays
//!
//! Pacing is the harvester's only congestion control: every request burst is
//! followed by a sleep drawn uniformly from a configured range.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;

/// An inclusive range of milliseconds to sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn millis(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed_millis(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max_ms == 0
    }

    /// Draws a delay uniformly from the range
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Sleeps for a random duration from `range`, returning the duration slept
pub async fn pause(range: &DelayRange) -> Duration {
    let delay = range.sample();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    delay
}

/// Like [`pause`], but wakes early once `shutdown` flips to `true`
///
/// Returns `true` if the sleep was cut short by a shutdown request.
pub async fn pause_unless_shutdown(range: &DelayRange, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let delay = range.sample();
    if delay.is_zero() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = wait_for_shutdown(shutdown) => changed,
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        if shutdown.changed().await.is_err() {
            // Sender dropped: nobody can request shutdown anymore.
            std::future::pending::<()>().await;
        }
        if *shutdown.borrow() {
            return true;
        }
    }
}
