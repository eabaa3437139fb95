//! HTTP client for the feed endpoints
//!
//! # Failure Handling
//!
//! | Condition | Action |
//! |-----------|--------|
//! | HTTP 429 | Sleep `pacing.rate-limit`, retry the same page (optionally capped) |
//! | HTTP 401 / 403 | Stop → `SessionInvalid` |
//! | Other error status whose body mentions login | Stop → `SessionInvalid` |
//! | Non-JSON body | Stop → `SessionInvalid` |
//! | Other non-success status | Stop → `Failed` |
//! | Transport error | Stop → `Failed` |
//!
//! Retried 429s do not consume the page budget.

use crate::config::{FeedConfig, PacingConfig};
use crate::credentials::Credentials;
use crate::feed::payload::{CommentsPage, ProfileResponse, SectionsPage};
use crate::feed::{shortcode_to_media_id, FeedError, FeedTab, FetchEnd, Fetched};
use crate::models::{Comment, Post, User};
use crate::pacing::pause;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;

/// Builds an HTTP client with the configured user agent and timeouts
pub fn build_http_client(config: &FeedConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Result of requesting a single page
enum PageOutcome<T> {
    Page(T),
    RateLimited,
    Stop(FetchEnd),
}

/// Client for the hashtag, comment and profile endpoints
///
/// Holds no session state: credentials are passed into every call.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: Client,
    base_url: String,
    app_id: String,
    max_rate_limit_retries: u32,
    comment_pages: u32,
    pacing: PacingConfig,
}

impl FeedClient {
    pub fn new(config: &FeedConfig, pacing: PacingConfig) -> Result<Self, FeedError> {
        Ok(Self {
            http: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            max_rate_limit_retries: config.max_rate_limit_retries,
            comment_pages: config.comment_pages,
            pacing,
        })
    }

    /// Default page budget for a comment thread
    pub fn comment_pages(&self) -> u32 {
        self.comment_pages
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        credentials: &Credentials,
        referer: &str,
    ) -> RequestBuilder {
        request
            .header("x-ig-app-id", &self.app_id)
            .header("x-csrftoken", credentials.csrf_token())
            .header("x-requested-with", "XMLHttpRequest")
            .header("x-asbd-id", "129477")
            .header("Accept", "*/*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", referer)
            .header("Cookie", credentials.cookie_header())
    }

    async fn request_page<T: DeserializeOwned>(&self, request: RequestBuilder) -> PageOutcome<T> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return PageOutcome::Stop(FetchEnd::Failed(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return PageOutcome::RateLimited;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return PageOutcome::Stop(FetchEnd::SessionInvalid(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            // An error body asking for login means the session is gone
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("login") {
                return PageOutcome::Stop(FetchEnd::SessionInvalid(format!(
                    "HTTP {} asking for login",
                    status.as_u16()
                )));
            }
            return PageOutcome::Stop(FetchEnd::Failed(format!("HTTP {}", status.as_u16())));
        }
        if !is_json(&response) {
            return PageOutcome::Stop(FetchEnd::SessionInvalid(format!(
                "non-JSON response ({})",
                content_type(&response)
            )));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return PageOutcome::Stop(FetchEnd::Failed(e.to_string())),
        };
        match serde_json::from_slice(&body) {
            Ok(page) => PageOutcome::Page(page),
            Err(e) => PageOutcome::Stop(FetchEnd::Failed(format!("malformed JSON: {}", e))),
        }
    }

    /// Sleeps after a 429; returns `false` once the retry limit is exceeded
    ///
    /// A limit of 0 retries forever.
    async fn back_off(&self, retries: &mut u32, context: &str) -> bool {
        *retries += 1;
        if self.max_rate_limit_retries > 0 && *retries > self.max_rate_limit_retries {
            tracing::error!(
                "{}: still rate limited after {} retries, giving up",
                context,
                self.max_rate_limit_retries
            );
            return false;
        }
        let waited = pause(&self.pacing.rate_limit).await;
        tracing::warn!(
            "{}: rate limited, waited {:.0}s (retry {})",
            context,
            waited.as_secs_f64(),
            retries
        );
        true
    }

    /// Walks up to `max_pages` pages of a hashtag feed
    ///
    /// Posts are deduplicated by code within the call. A failure part-way
    /// through returns every post collected so far.
    pub async fn fetch_hashtag_posts(
        &self,
        credentials: &Credentials,
        tag: &str,
        tab: FeedTab,
        max_pages: u32,
    ) -> Fetched<Post> {
        let url = format!("{}/api/v1/tags/{}/sections/", self.base_url, tag);
        let referer = format!("{}/explore/tags/{}/", self.base_url, tag);
        let context = format!("#{} ({})", tag, tab);

        let mut posts = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        let mut retries = 0;

        let end = loop {
            if pages >= max_pages {
                break FetchEnd::PageBudget;
            }

            let mut form = vec![("tab", tab.as_str().to_string())];
            if let Some(max_id) = &cursor {
                form.push(("max_id", max_id.clone()));
            }
            let request = self.authorized(self.http.post(&url), credentials, &referer).form(&form);

            let page: SectionsPage = match self.request_page(request).await {
                PageOutcome::Page(page) => page,
                PageOutcome::RateLimited => {
                    if self.back_off(&mut retries, &context).await {
                        continue;
                    }
                    break FetchEnd::RateLimited;
                }
                PageOutcome::Stop(end) => {
                    tracing::warn!("{} page {}: {:?}", context, pages + 1, end);
                    break end;
                }
            };

            retries = 0;
            pages += 1;

            let before = posts.len();
            for post in page.medias().filter_map(|media| media.to_post()) {
                if seen.insert(post.code.clone()) {
                    posts.push(post);
                }
            }

            tracing::info!(
                "{} page {}/{}: +{} (total: {}, more={})",
                context,
                pages,
                max_pages,
                posts.len() - before,
                posts.len(),
                page.more_available
            );

            if !page.more_available {
                break FetchEnd::Exhausted;
            }
            cursor = match page.next_max_id {
                Some(next) if !next.is_empty() => Some(next),
                _ => break FetchEnd::Exhausted,
            };
            if pages < max_pages {
                pause(&self.pacing.page).await;
            }
        };

        Fetched {
            items: posts,
            pages,
            end,
        }
    }

    /// Walks up to `max_pages` pages of a post's comment thread
    pub async fn fetch_comments(
        &self,
        credentials: &Credentials,
        post_code: &str,
        max_pages: u32,
    ) -> Fetched<Comment> {
        let media_id = match shortcode_to_media_id(post_code) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Comments {}: {}", post_code, e);
                return Fetched {
                    items: Vec::new(),
                    pages: 0,
                    end: FetchEnd::Failed(e.to_string()),
                };
            }
        };

        let url = format!("{}/api/v1/media/{}/comments/", self.base_url, media_id);
        let referer = format!("{}/p/{}/", self.base_url, post_code);
        let context = format!("Comments {}", post_code);

        let mut comments = Vec::new();
        let mut min_id: Option<String> = None;
        let mut pages = 0;
        let mut retries = 0;

        let end = loop {
            if pages >= max_pages {
                break FetchEnd::PageBudget;
            }

            let mut query = vec![("can_support_threading", "true".to_string())];
            if let Some(id) = &min_id {
                query.push(("min_id", id.clone()));
            }
            let request = self.authorized(self.http.get(&url), credentials, &referer).query(&query);

            let page: CommentsPage = match self.request_page(request).await {
                PageOutcome::Page(page) => page,
                PageOutcome::RateLimited => {
                    if self.back_off(&mut retries, &context).await {
                        continue;
                    }
                    break FetchEnd::RateLimited;
                }
                PageOutcome::Stop(end) => {
                    tracing::warn!("{} page {}: {:?}", context, pages + 1, end);
                    break end;
                }
            };

            retries = 0;
            pages += 1;
            comments.extend(page.comments.iter().filter_map(|c| c.to_comment(post_code)));

            if !page.has_more_comments {
                break FetchEnd::Exhausted;
            }
            min_id = match page.next_min_id {
                Some(next) if !next.is_empty() => Some(next),
                _ => break FetchEnd::Exhausted,
            };
            if pages < max_pages {
                pause(&self.pacing.comment_page).await;
            }
        };

        tracing::debug!("{}: {} comments over {} pages", context, comments.len(), pages);
        Fetched {
            items: comments,
            pages,
            end,
        }
    }

    /// Fetches a full profile; any failure is reported as `None`
    pub async fn fetch_user_profile(&self, credentials: &Credentials, username: &str) -> Option<User> {
        let url = format!("{}/api/v1/users/web_profile_info/", self.base_url);
        let referer = format!("{}/{}/", self.base_url, username);
        let request = self
            .authorized(self.http.get(&url), credentials, &referer)
            .query(&[("username", username)]);

        match self.request_page::<ProfileResponse>(request).await {
            PageOutcome::Page(profile) => profile.into_user(username),
            PageOutcome::RateLimited => {
                tracing::debug!("Profile @{}: rate limited", username);
                None
            }
            PageOutcome::Stop(end) => {
                tracing::debug!("Profile @{}: {:?}", username, end);
                None
            }
        }
    }

    /// Downloads media bytes; any failure is reported as `None`
    pub async fn download_media(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Media download failed for {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Media download failed for {}: HTTP {}",
                url,
                response.status().as_u16()
            );
            return None;
        }

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes.to_vec()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Media download failed for {}: {}", url, e);
                None
            }
        }
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn is_json(response: &Response) -> bool {
    content_type(response).contains("json")
}
