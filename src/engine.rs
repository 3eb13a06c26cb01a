//! The synchronization engine: one explicitly constructed object owning the
//! store, the HTTP client and the refresh-in-progress flag.
//!
//! Front ends (the CLI, a scheduler) hold a `FeedEngine` (usually behind an
//! `Arc`) and drive it through the methods below.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::feed::{self, DiscoveryError, OpenGraph};
use crate::storage::{
    Article, Database, DatabaseError, DiscoveredFeed, Feed, FeedFilter, SearchHit,
};

pub struct FeedEngine {
    db: Database,
    client: reqwest::Client,
    images: OpenGraph,
    max_age_days: u32,
    refreshing: AtomicBool,
}

/// Clears the in-progress flag when a refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FeedEngine {
    pub fn new(db: Database, client: reqwest::Client, images: OpenGraph, max_age_days: u32) -> Self {
        Self {
            db,
            client,
            images,
            max_age_days,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Builds the HTTP client from the configured timeouts. Preview images
    /// share that client unless disabled.
    pub fn from_config(db: Database, config: &Config) -> Result<Self, reqwest::Error> {
        let client = feed::build_client(config.connect_timeout(), config.read_timeout())?;
        let images = if config.fetch_preview_images {
            OpenGraph::new(client.clone())
        } else {
            OpenGraph::disabled()
        };
        Ok(Self::new(db, client, images, config.max_age_days))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Resolves a user-supplied address (feed or HTML page) to verified feeds.
    pub async fn resolve_feeds(&self, address: &str) -> Result<Vec<DiscoveredFeed>, DiscoveryError> {
        feed::resolve_feeds(&self.client, address).await
    }

    /// Fails with [`DatabaseError::DuplicateFeed`] if the url is already subscribed.
    pub async fn add_feed(&self, feed: &DiscoveredFeed) -> Result<Feed, DatabaseError> {
        let stored = self.db.add_feed(feed).await?;
        tracing::info!(feed = %stored.url, id = stored.id, "Subscribed");
        Ok(stored)
    }

    /// Unsubscribes and deletes the feed's articles. Returns `false` if the
    /// feed was already gone.
    pub async fn remove_feed(&self, feed: &Feed) -> Result<bool, DatabaseError> {
        let removed = self.db.remove_feed(feed.id).await?;
        if removed {
            tracing::info!(feed = %feed.url, id = feed.id, "Unsubscribed");
        }
        Ok(removed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        self.db.list_feeds().await
    }

    pub async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        self.db.feed_by_url(url).await
    }

    /// Every feed with its UNREAD article count, ordered by name.
    pub async fn unread_counts_by_feed(&self) -> Result<Vec<(Feed, i64)>, DatabaseError> {
        self.db.unread_counts().await
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Runs one refresh cycle over every subscribed feed, then sweeps
    /// articles older than the retention window.
    ///
    /// Returns `false` without doing anything if another cycle is already
    /// running. Per-feed failures are logged and never change the result.
    pub async fn refresh(&self) -> bool {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Refresh already in progress");
            return false;
        }
        let _guard = RefreshGuard(&self.refreshing);

        let started = Instant::now();
        match self.db.list_feeds().await {
            Ok(feeds) => {
                let total = feeds.len();
                tracing::info!(feeds = total, "Refresh started");

                let results =
                    feed::refresh_all(&self.db, &self.client, &self.images, feeds, self.max_age_days)
                        .await;
                let failed = results.iter().filter(|r| r.result.is_err()).count();
                let inserted: usize = results.iter().filter_map(|r| r.result.as_ref().ok()).sum();

                tracing::info!(
                    feeds = total,
                    failed = failed,
                    inserted = inserted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Refresh finished"
                );
            }
            Err(e) => tracing::error!(error = %e, "Failed to list feeds for refresh"),
        }

        self.sweep_expired().await;
        true
    }

    /// Refreshes every `interval`, starting immediately, until `shutdown`
    /// completes. The database is compacted after each cycle.
    ///
    /// `shutdown` is watched during a cycle as well as between cycles; a
    /// cycle cut short keeps the feeds already committed and releases the
    /// in-progress flag.
    pub async fn run_scheduled<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let cycle = async {
                ticker.tick().await;
                if self.refresh().await {
                    if let Err(e) = self.vacuum().await {
                        tracing::warn!(error = %e, "VACUUM after scheduled refresh failed");
                    }
                }
            };

            tokio::select! {
                _ = cycle => {}
                _ = &mut shutdown => {
                    tracing::info!(refreshing = self.is_refreshing(), "Scheduled refresh stopped");
                    return;
                }
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    async fn sweep_expired(&self) {
        let cutoff = feed::age_cutoff(self.max_age_days);
        match self.db.remove_articles_before(cutoff).await {
            Ok(removed) => {
                tracing::info!(removed = removed, cutoff = %cutoff, "Retention sweep finished")
            }
            Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
        }
    }

    // ========================================================================
    // Read State
    // ========================================================================

    pub async fn mark_article_grey(&self, article: &Article) -> Result<bool, DatabaseError> {
        self.db.mark_article_grey(article.id).await
    }

    /// Ends a viewing session: every GREY article becomes READ.
    pub async fn finalize_grey_session(&self) -> Result<u64, DatabaseError> {
        let finalized = self.db.finalize_grey().await?;
        tracing::debug!(finalized = finalized, "Grey session finalized");
        Ok(finalized)
    }

    pub async fn mark_all_read(&self, filter: FeedFilter) -> Result<u64, DatabaseError> {
        self.db.mark_all_read(filter).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn articles(
        &self,
        filter: FeedFilter,
        hide_read: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Article>, DatabaseError> {
        self.db.articles(filter, hide_read, limit).await
    }

    pub async fn article_count(&self, filter: FeedFilter, hide_read: bool) -> Result<i64, DatabaseError> {
        self.db.article_count(filter, hide_read).await
    }

    pub async fn search_articles(&self, term: &str) -> Result<Vec<SearchHit>, DatabaseError> {
        self.db.search_articles(term).await
    }

    /// Compacts the database file.
    pub async fn vacuum(&self) -> Result<(), DatabaseError> {
        self.db.vacuum().await
    }
}
