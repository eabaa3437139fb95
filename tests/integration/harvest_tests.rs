//! Integration tests for the harvest pipelines
//!
//! A wiremock server plays the feed while an in-memory SQLite database
//! records what the harvester stores.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tagminer::config::{FeedConfig, PacingConfig};
use tagminer::harvest::HarvestError;
use tagminer::storage::SqliteStorage;
use tagminer::{shortcode_to_media_id, Credentials, FeedClient, FeedTab, Harvester, Storage, User};
use tempfile::TempDir;
use wiremock::matchers::{body_string, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECTIONS: &str = "/api/v1/tags/travel/sections/";
const PROFILE: &str = "/api/v1/users/web_profile_info/";

fn credentials() -> Credentials {
    let mut cookies = BTreeMap::new();
    cookies.insert("sessionid".to_string(), "abc".to_string());
    Credentials::new(cookies).unwrap()
}

fn harvester(server: &MockServer, storage: Arc<SqliteStorage>) -> Harvester {
    let config = FeedConfig {
        base_url: server.uri(),
        comment_pages: 2,
        ..FeedConfig::default()
    };
    let feed = FeedClient::new(&config, PacingConfig::immediate()).unwrap();
    Harvester::new(feed, storage)
}

fn media(server: &MockServer, code: &str, author: &str, likes: i64, comments: i64) -> Value {
    json!({
        "media": {
            "code": code,
            "user": {"username": author, "full_name": "Traveller", "is_verified": false},
            "caption": {"text": "Terraces at dawn #travel #rice"},
            "like_count": likes,
            "comment_count": comments,
            "media_type": 1,
            "image_versions2": {"candidates": [
                {"url": format!("{}/media/{}.jpg", server.uri(), code), "width": 1080, "height": 1080}
            ]}
        }
    })
}

fn sections_page(medias: Vec<Value>, more: bool, next: Option<&str>) -> Value {
    json!({
        "sections": [{"layout_content": {"medias": medias}}],
        "more_available": more,
        "next_max_id": next
    })
}

async fn mount_single_page(server: &MockServer, medias: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path(SECTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(sections_page(medias, false, None)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_second_run_stores_nothing_new() {
    let server = MockServer::start().await;
    mount_single_page(
        &server,
        vec![
            media(&server, "A1", "wanderer", 10, 0),
            media(&server, "B2", "nomad", 20, 0),
        ],
    )
    .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let harvester = harvester(&server, storage.clone());

    let first = harvester
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, false, false)
        .await
        .unwrap();
    assert_eq!(first, 2);

    let second = harvester
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, false, false)
        .await
        .unwrap();
    assert_eq!(second, 0);
    assert_eq!(storage.get_post_count().await.unwrap(), 2);

    let author = storage.get_user("wanderer").unwrap().unwrap();
    assert_eq!(author.full_name.as_deref(), Some("Traveller"));
    assert!(!author.is_enriched());
}

#[tokio::test]
async fn test_known_posts_are_not_rewritten() {
    let server = MockServer::start().await;
    mount_single_page(&server, vec![media(&server, "A1", "wanderer", 999, 0)]).await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut existing = tagminer::Post::new("A1", Default::default(), "original");
    existing.likes = Some(1);
    storage.upsert_post(&existing).await.unwrap();

    let stored = harvester(&server, storage.clone())
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, false, false)
        .await
        .unwrap();

    assert_eq!(stored, 0);
    let post = storage.get_post("A1").unwrap().unwrap();
    assert_eq!(post.likes, Some(1));
}

#[tokio::test]
async fn test_media_download_sets_storage_url() {
    let server = MockServer::start().await;
    mount_single_page(
        &server,
        vec![
            media(&server, "A1", "wanderer", 10, 0),
            media(&server, "B2", "nomad", 20, 0),
        ],
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/media/A1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/media/B2.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    let storage = Arc::new(
        SqliteStorage::new(&dir.path().join("harvest.db"), Some(images.clone())).unwrap(),
    );

    let stored = harvester(&server, storage.clone())
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, true, false)
        .await
        .unwrap();
    assert_eq!(stored, 2);

    let with_media = storage.get_post("A1").unwrap().unwrap();
    assert!(with_media.storage_url.unwrap().ends_with("A1.jpg"));
    assert_eq!(std::fs::read(images.join("A1.jpg")).unwrap(), b"jpeg");

    let without_media = storage.get_post("B2").unwrap().unwrap();
    assert_eq!(without_media.storage_url, None);
}

#[tokio::test]
async fn test_media_is_not_downloaded_without_media_storage() {
    let server = MockServer::start().await;
    mount_single_page(&server, vec![media(&server, "A1", "wanderer", 10, 0)]).await;

    Mock::given(method("GET"))
        .and(path("/media/A1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(SqliteStorage::new(&dir.path().join("harvest.db"), None).unwrap());

    let stored = harvester(&server, storage.clone())
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, true, false)
        .await
        .unwrap();
    assert_eq!(stored, 1);
    assert_eq!(storage.get_post("A1").unwrap().unwrap().storage_url, None);
}

#[tokio::test]
async fn test_enrichment_skips_already_enriched_authors() {
    let server = MockServer::start().await;
    mount_single_page(
        &server,
        vec![
            media(&server, "A1", "wanderer", 10, 0),
            media(&server, "B2", "wanderer", 5, 0),
            media(&server, "C3", "nomad", 20, 0),
            media(&server, "D4", "ghost", 1, 0),
        ],
    )
    .await;

    Mock::given(method("GET"))
        .and(path(PROFILE))
        .and(query_param("username", "wanderer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"user": {
                "biography": "Slow travel",
                "edge_followed_by": {"count": 1200},
                "edge_follow": {"count": 300},
                "edge_owner_to_timeline_media": {"count": 87},
                "is_verified": true
            }}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(PROFILE))
        .and(query_param("username", "nomad"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(PROFILE))
        .and(query_param("username", "ghost"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let mut nomad = User::minimal("nomad", "Nomad", false);
    nomad.followers = Some(50);
    storage.upsert_user(&nomad).await.unwrap();

    let stored = harvester(&server, storage.clone())
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, false, true)
        .await
        .unwrap();
    assert_eq!(stored, 4);

    let wanderer = storage.get_user("wanderer").unwrap().unwrap();
    assert_eq!(wanderer.followers, Some(1200));
    assert_eq!(wanderer.bio.as_deref(), Some("Slow travel"));
    assert_eq!(wanderer.full_name.as_deref(), Some("Traveller"));
    assert!(wanderer.is_verified);

    let ghost = storage.get_user("ghost").unwrap().unwrap();
    assert!(!ghost.is_enriched());
}

#[tokio::test]
async fn test_session_expiry_keeps_partial_posts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SECTIONS))
        .and(body_string("tab=top"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sections_page(
            vec![media(&server, "A1", "wanderer", 10, 0)],
            true,
            Some("cursor-1"),
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SECTIONS))
        .and(body_string_contains("max_id=cursor-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Please log in</html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let result = harvester(&server, storage.clone())
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 5, false, false)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, HarvestError::SessionExpired { .. }));
    assert!(err.is_auth_failure());
    assert_eq!(storage.get_post_count().await.unwrap(), 1);
}

fn comments_page(comments: Vec<Value>) -> Value {
    json!({"comments": comments, "has_more_comments": false, "next_min_id": null})
}

#[tokio::test]
async fn test_comment_batch_backfills_most_liked_first() {
    let server = MockServer::start().await;
    mount_single_page(
        &server,
        vec![
            media(&server, "Low", "wanderer", 5, 2),
            media(&server, "High", "nomad", 500, 1),
            media(&server, "Quiet", "nomad", 900, 0),
        ],
    )
    .await;

    let high_id = shortcode_to_media_id("High").unwrap();
    let low_id = shortcode_to_media_id("Low").unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/api/v1/media/{}/comments/", high_id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_page(vec![json!({
            "pk": 11, "user": {"username": "fan"}, "text": "wow", "comment_like_count": 4
        })])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/v1/media/{}/comments/", low_id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(comments_page(vec![])))
        .expect(2)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let harvester = harvester(&server, storage.clone());
    harvester
        .scrape_hashtag(&credentials(), "travel", FeedTab::Top, 1, false, false)
        .await
        .unwrap();

    let needing = storage.get_posts_needing_comments(10).await.unwrap();
    let codes: Vec<_> = needing.iter().map(|p| p.code.as_str()).collect();
    assert_eq!(codes, vec!["High", "Low"]);

    let stored = harvester
        .scrape_comments_batch(&credentials(), 10)
        .await
        .unwrap();
    assert_eq!(stored, 1);

    let comments = storage.get_comments("High").unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].likes, 4);

    // "Low" yielded nothing, so it is still a candidate
    let again = harvester
        .scrape_comments_batch(&credentials(), 10)
        .await
        .unwrap();
    assert_eq!(again, 0);
}
