use super::schema::Database;
use super::types::{DatabaseError, DiscoveredFeed, Feed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::DuplicateFeed` if a feed with the same url is
    /// already stored; nothing is written in that case.
    pub async fn add_feed(&self, feed: &DiscoveredFeed) -> Result<Feed, DatabaseError> {
        let result = sqlx::query_as::<_, Feed>(
            "INSERT INTO feeds (name, url) VALUES (?, ?) RETURNING id, name, url",
        )
        .bind(&feed.name)
        .bind(&feed.url)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(stored) => Ok(stored),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(DatabaseError::DuplicateFeed(feed.url.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unsubscribe from a feed. Its articles are deleted with it.
    ///
    /// Returns `false` if no feed had this id.
    pub async fn remove_feed(&self, feed_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All subscribed feeds, ordered by name
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT id, name, url FROM feeds ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    /// Id of the feed stored under `url`
    pub async fn feed_id(&self, url: &str) -> Result<Option<i64>, DatabaseError> {
        let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|(id,)| id))
    }

    pub async fn feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT id, name, url FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Every feed with its number of UNREAD articles (GREY does not count),
    /// ordered by name. Feeds without articles report zero.
    pub async fn unread_counts(&self) -> Result<Vec<(Feed, i64)>, DatabaseError> {
        let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
            r#"
                SELECT
                    f.id, f.name, f.url,
                    COUNT(CASE WHEN a.read_status = 0 THEN 1 END) as unread_count
                FROM feeds f
                LEFT JOIN articles a ON f.id = a.feed_id
                GROUP BY f.id
                ORDER BY f.name, f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, url, unread)| (Feed { id, name, url }, unread))
            .collect())
    }
}
