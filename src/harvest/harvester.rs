//! Hashtag and comment harvesting pipelines

use crate::credentials::Credentials;
use crate::feed::{FeedClient, FeedTab, FetchEnd};
use crate::harvest::HarvestError;
use crate::models::{Post, User};
use crate::pacing::pause;
use crate::storage::Storage;
use std::collections::HashSet;
use std::sync::Arc;

/// Drives the feed client and persists what it returns
pub struct Harvester {
    feed: FeedClient,
    storage: Arc<dyn Storage>,
}

impl Harvester {
    pub fn new(feed: FeedClient, storage: Arc<dyn Storage>) -> Self {
        Self { feed, storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn feed(&self) -> &FeedClient {
        &self.feed
    }

    /// Harvests one hashtag, returning the number of newly stored posts
    ///
    /// Posts already in storage are discarded without being re-upserted.
    /// Media is only downloaded when the backend keeps it.
    /// Enriched profiles are not included in the count. If the session turned
    /// out to be invalid, the posts fetched before that are still stored and
    /// `HarvestError::SessionExpired` is returned afterwards.
    pub async fn scrape_hashtag(
        &self,
        credentials: &Credentials,
        tag: &str,
        tab: FeedTab,
        max_pages: u32,
        download_images: bool,
        enrich_users: bool,
    ) -> Result<usize, HarvestError> {
        let context = format!("#{} ({})", tag, tab);
        let existing = self.storage.get_existing_codes().await?;

        let fetched = self
            .feed
            .fetch_hashtag_posts(credentials, tag, tab, max_pages)
            .await;
        let total = fetched.len();
        let new_posts: Vec<Post> = fetched
            .items
            .into_iter()
            .filter(|p| !existing.contains(&p.code))
            .collect();

        tracing::info!(
            "{}: {} fetched over {} pages, {} new",
            context,
            total,
            fetched.pages,
            new_posts.len()
        );

        let download_images = download_images && self.storage.stores_media();
        let mut stored = 0;
        let mut authors: Vec<String> = Vec::new();
        let last = new_posts.len().saturating_sub(1);

        for (index, mut post) in new_posts.into_iter().enumerate() {
            if download_images {
                self.attach_media(&mut post).await;
            }

            let author = &post.author;
            if !author.username.is_empty() {
                let user = User::minimal(&author.username, &author.full_name, author.is_verified);
                if let Err(e) = self.storage.upsert_user(&user).await {
                    tracing::warn!("{}: failed to store user @{}: {}", context, user.username, e);
                }
            }

            match self.storage.upsert_post(&post).await {
                Ok(()) => {
                    stored += 1;
                    if !post.author.username.is_empty() && !authors.contains(&post.author.username)
                    {
                        authors.push(post.author.username.clone());
                    }
                }
                Err(e) => tracing::warn!("{}: failed to store post {}: {}", context, post.code, e),
            }

            if index < last {
                pause(&self.feed.pacing().post).await;
            }
        }

        tracing::info!("{}: stored {} new posts", context, stored);

        if let FetchEnd::SessionInvalid(reason) = fetched.end {
            return Err(HarvestError::SessionExpired { context, reason });
        }

        if enrich_users && !authors.is_empty() {
            self.enrich_authors(credentials, &authors).await;
        }

        Ok(stored)
    }

    /// Downloads a post's media and records where storage put it
    async fn attach_media(&self, post: &mut Post) {
        let url = match &post.image_url {
            Some(url) => url.clone(),
            None => return,
        };
        let bytes = match self.feed.download_media(&url).await {
            Some(bytes) => bytes,
            None => return,
        };

        let filename = format!("{}.jpg", post.code);
        match self.storage.store_image(&bytes, &filename).await {
            Ok(Some(location)) => post.storage_url = Some(location),
            Ok(None) => {}
            Err(e) => tracing::warn!("Post {}: failed to store media: {}", post.code, e),
        }
    }

    /// Fetches and stores full profiles for authors not yet enriched
    async fn enrich_authors(&self, credentials: &Credentials, authors: &[String]) {
        let enriched = match self.storage.get_enriched_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!("Cannot read enriched users, enriching all authors: {}", e);
                HashSet::new()
            }
        };

        let pending: Vec<&String> = authors.iter().filter(|a| !enriched.contains(*a)).collect();
        let mut done = 0;

        for (index, username) in pending.iter().enumerate() {
            if index > 0 {
                pause(&self.feed.pacing().enrichment).await;
            }
            match self.feed.fetch_user_profile(credentials, username).await {
                Some(user) => match self.storage.upsert_user(&user).await {
                    Ok(()) => done += 1,
                    Err(e) => tracing::warn!("Failed to store profile @{}: {}", username, e),
                },
                None => tracing::debug!("Profile @{} unavailable, skipping", username),
            }
        }

        tracing::info!("Enriched {}/{} authors", done, pending.len());
    }

    /// Back-fills comments for up to `limit` stored posts lacking them
    ///
    /// Returns the total number of comments stored. A post that yields no
    /// comments is not an error.
    pub async fn scrape_comments_batch(
        &self,
        credentials: &Credentials,
        limit: usize,
    ) -> Result<usize, HarvestError> {
        let candidates = self.storage.get_posts_needing_comments(limit).await?;
        if candidates.is_empty() {
            tracing::info!("No posts need comments");
            return Ok(0);
        }
        tracing::info!("Fetching comments for {} posts", candidates.len());

        let mut total = 0;
        for (index, candidate) in candidates.iter().enumerate() {
            if index > 0 {
                pause(&self.feed.pacing().comment_post).await;
            }

            let fetched = self
                .feed
                .fetch_comments(credentials, &candidate.code, self.feed.comment_pages())
                .await;

            let mut stored = 0;
            for comment in &fetched.items {
                match self.storage.upsert_comment(comment).await {
                    Ok(()) => stored += 1,
                    Err(e) => tracing::warn!(
                        "Post {}: failed to store comment {}: {}",
                        candidate.code,
                        comment.id,
                        e
                    ),
                }
            }
            total += stored;

            tracing::debug!(
                "Post {}: {} comments stored ({} reported)",
                candidate.code,
                stored,
                candidate.comments_count
            );

            if let FetchEnd::SessionInvalid(reason) = fetched.end {
                tracing::info!("Comment pass stopped after {} comments", total);
                return Err(HarvestError::SessionExpired {
                    context: format!("comments of {}", candidate.code),
                    reason,
                });
            }
        }

        tracing::info!(
            "Stored {} comments across {} posts",
            total,
            candidates.len()
        );
        Ok(total)
    }
}
