//! Integration tests for the daemon state machine
//!
//! Cycles run against a wiremock feed with zero pacing, so every pause in a
//! cycle returns immediately.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tagminer::config::{DaemonConfig, FeedConfig, PacingConfig};
use tagminer::credentials::{CredentialError, CredentialSource};
use tagminer::daemon::CycleReport;
use tagminer::storage::SqliteStorage;
use tagminer::{
    shortcode_to_media_id, Credentials, Daemon, DaemonState, FeedClient, Harvester, Post, Storage,
};
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANY_SECTIONS: &str = r"^/api/v1/tags/[^/]+/sections/$";

fn bag(session: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    cookies.insert("sessionid".to_string(), session.to_string());
    cookies
}

/// Credential source that counts calls and can be told to fail refreshes
struct FakeSource {
    refresh_ok: bool,
    refreshes: AtomicUsize,
    loads: AtomicUsize,
}

impl FakeSource {
    fn new(refresh_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            refresh_ok,
            refreshes: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CredentialSource for FakeSource {
    async fn load(&self) -> Result<Arc<Credentials>, CredentialError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Credentials::new(bag("persisted"))?))
    }

    async fn refresh(&self, current: &Credentials) -> Result<Arc<Credentials>, CredentialError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_ok {
            return Err(CredentialError::RefreshFailed("login wall".to_string()));
        }
        Ok(Arc::new(current.succeed(bag("fresh"))?))
    }
}

fn daemon_config(hashtags: &[&str], target: u64, pid_file: &str) -> DaemonConfig {
    DaemonConfig {
        hashtags: hashtags.iter().map(|t| t.to_string()).collect(),
        target,
        download_images: false,
        pid_file: pid_file.to_string(),
        top_pages: 2,
        recent_pages: 1,
        recent_sample: 15,
        comment_limit: 300,
        target_reached_comment_limit: 500,
    }
}

struct Fixture {
    daemon: Daemon,
    storage: Arc<SqliteStorage>,
    shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

fn fixture(
    server: &MockServer,
    storage: Arc<SqliteStorage>,
    hashtags: &[&str],
    target: u64,
    source: Arc<FakeSource>,
) -> Fixture {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("daemon.pid");
    let config = daemon_config(hashtags, target, &pid_file.to_string_lossy());

    let feed_config = FeedConfig {
        base_url: server.uri(),
        ..FeedConfig::default()
    };
    let feed = FeedClient::new(&feed_config, PacingConfig::immediate()).unwrap();
    let harvester = Harvester::new(feed, storage.clone());
    let credentials = Arc::new(Credentials::new(bag("initial")).unwrap());
    let (shutdown, shutdown_rx) = watch::channel(false);

    Fixture {
        daemon: Daemon::new(
            config,
            PacingConfig::immediate(),
            harvester,
            source,
            credentials,
            shutdown_rx,
        ),
        storage,
        shutdown,
        _dir: dir,
    }
}

fn media(code: &str) -> Value {
    json!({
        "media": {
            "code": code,
            "user": {"username": "wanderer", "full_name": "", "is_verified": false},
            "caption": {"text": "#travel"},
            "like_count": 1,
            "comment_count": 0
        }
    })
}

fn single_page(codes: &[&str]) -> Value {
    json!({
        "sections": [{"layout_content": {"medias": codes.iter().map(|c| media(c)).collect::<Vec<_>>()}}],
        "more_available": false,
        "next_max_id": null
    })
}

#[tokio::test]
async fn test_target_reached_only_backfills_comments() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page(&["Z9"])))
        .expect(0)
        .mount(&server)
        .await;

    let media_id = shortcode_to_media_id("A1").unwrap();
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/media/{}/comments/", media_id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "comments": [{"pk": 1, "user": {"username": "fan"}, "text": "nice", "comment_like_count": 0}],
            "has_more_comments": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut commented = Post::new("A1", Default::default(), "#travel");
    commented.comments_count = Some(1);
    storage.upsert_post(&commented).await.unwrap();
    storage
        .upsert_post(&Post::new("B2", Default::default(), "#travel"))
        .await
        .unwrap();

    let mut fx = fixture(&server, storage, &["travel", "food"], 2, FakeSource::new(true));
    let report = fx.daemon.run_cycle().await;

    assert_eq!(
        report,
        CycleReport {
            cycle: 1,
            state: DaemonState::TargetReached,
            posts_stored: 0,
            comments_stored: 1,
            failures: 0,
        }
    );
    assert_eq!(fx.daemon.state(), DaemonState::TargetReached);
}

#[tokio::test]
async fn test_crawling_cycle_runs_top_and_recent_passes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page(&["A1", "B2"])))
        .expect(2)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["#travel"], 1_000, FakeSource::new(true));
    let report = fx.daemon.run_cycle().await;

    assert_eq!(report.state, DaemonState::Crawling);
    assert_eq!(report.posts_stored, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(fx.storage.get_post_count().await.unwrap(), 2);

    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| r.url.path() == "/api/v1/tags/travel/sections/"));
}

#[tokio::test]
async fn test_target_reached_mid_cycle_stops_crawling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page(&["A1", "B2"])))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["travel", "food", "hiking"], 2, FakeSource::new(true));
    let report = fx.daemon.run_cycle().await;

    assert_eq!(report.state, DaemonState::TargetReached);
    assert_eq!(report.posts_stored, 2);
}

#[tokio::test]
async fn test_target_reached_mid_cycle_still_backfills_comments() {
    let server = MockServer::start().await;

    let mut medias = vec![media("A1"), media("B2")];
    for entry in &mut medias {
        entry["media"]["comment_count"] = json!(2);
    }
    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sections": [{"layout_content": {"medias": medias}}],
            "more_available": false,
            "next_max_id": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v1/media/\d+/comments/$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "comments": [],
            "has_more_comments": false
        })))
        .expect(2)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["travel", "food"], 2, FakeSource::new(true));
    let report = fx.daemon.run_cycle().await;

    assert_eq!(report.state, DaemonState::TargetReached);
    assert_eq!(report.posts_stored, 2);

    // No recent-tab pass follows the comment pass
    let sections = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with("/sections/"))
        .count();
    assert_eq!(sections, 1);
}

#[tokio::test]
async fn test_session_expiry_triggers_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>login</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let source = FakeSource::new(true);
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["travel"], 1_000, source.clone());
    let report = fx.daemon.run_cycle().await;

    // Top pass and recent pass both fail
    assert_eq!(report.failures, 2);
    assert_eq!(report.state, DaemonState::Crawling);
    assert_eq!(source.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(source.loads.load(Ordering::SeqCst), 0);
    assert_eq!(fx.daemon.credentials().version(), 3);
    assert_eq!(fx.daemon.credentials().get("sessionid"), Some("fresh"));
}

#[tokio::test]
async fn test_failed_refresh_reloads_persisted_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(ANY_SECTIONS))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let source = FakeSource::new(false);
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["travel"], 1_000, source.clone());
    let report = fx.daemon.run_cycle().await;

    assert_eq!(report.failures, 2);
    assert_eq!(source.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    assert_eq!(fx.daemon.credentials().get("sessionid"), Some("persisted"));
}

#[tokio::test]
async fn test_hashtag_failure_does_not_abort_cycle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/tags/broken/sections/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/tags/travel/sections/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(single_page(&["A1"])))
        .mount(&server)
        .await;

    let source = FakeSource::new(true);
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["broken", "travel"], 1_000, source.clone());
    let report = fx.daemon.run_cycle().await;

    // A 500 ends the fetch early without raising, so nothing counts as a failure
    assert_eq!(report.failures, 0);
    assert_eq!(report.posts_stored, 1);
    assert_eq!(source.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_before_cycle_makes_no_calls() {
    let server = MockServer::start().await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut fx = fixture(&server, storage, &["travel"], 1_000, FakeSource::new(true));
    fx.shutdown.send(true).unwrap();

    let report = fx.daemon.run_cycle().await;
    assert_eq!(report.state, DaemonState::Stopping);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_removes_pid_file_on_shutdown() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("daemon.pid");

    let feed_config = FeedConfig {
        base_url: server.uri(),
        ..FeedConfig::default()
    };
    let feed = FeedClient::new(&feed_config, PacingConfig::immediate()).unwrap();
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let (shutdown, shutdown_rx) = watch::channel(false);

    let mut daemon = Daemon::new(
        daemon_config(&["travel"], 1_000, &pid_file.to_string_lossy()),
        PacingConfig::immediate(),
        Harvester::new(feed, storage),
        FakeSource::new(true),
        Arc::new(Credentials::new(bag("initial")).unwrap()),
        shutdown_rx,
    );

    shutdown.send(true).unwrap();
    daemon.run().await.unwrap();

    assert_eq!(daemon.state(), DaemonState::Stopping);
    assert!(!pid_file.exists());
    assert!(server.received_requests().await.unwrap().is_empty());
}
