use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{
    Article, ArticleDbRow, DatabaseError, FeedFilter, ParsedArticle, ReadStatus, SearchHit,
    SearchRow,
};

const ARTICLE_COLUMNS: &str =
    "id, feed_id, title, link, description, image_url, publication_date, guid, read_status";

/// Appends the shared WHERE clause for feed-scoped, optionally read-hiding queries.
fn push_scope(builder: &mut QueryBuilder<'_, Sqlite>, filter: FeedFilter, hide_read: bool) {
    builder.push(" WHERE 1 = 1");
    if let Some(feed_id) = filter.feed_id() {
        builder.push(" AND feed_id = ").push_bind(feed_id);
    }
    if hide_read {
        // GREY stays visible until the session is finalized
        builder
            .push(" AND read_status != ")
            .push_bind(ReadStatus::Read.as_i64());
    }
}

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Guid of the newest stored article of a feed, the incremental watermark.
    ///
    /// Among articles sharing the newest date, the one inserted first wins:
    /// that is the one that appeared highest in the feed document.
    pub async fn latest_guid(&self, feed_id: i64) -> Result<Option<String>, DatabaseError> {
        let guid: Option<(String,)> = sqlx::query_as(
            r#"
                SELECT guid FROM articles
                WHERE feed_id = ?
                ORDER BY publication_date DESC, id ASC
                LIMIT 1
            "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(guid.map(|(g,)| g))
    }

    /// Insert new articles as UNREAD in one transaction.
    ///
    /// Articles whose guid is already stored for this feed are skipped.
    /// Returns the number of rows actually inserted. Either every row of the
    /// batch is committed or none is.
    pub async fn add_articles(
        &self,
        feed_id: i64,
        articles: &[ParsedArticle],
    ) -> Result<usize, DatabaseError> {
        if articles.is_empty() {
            return Ok(0);
        }

        // 9 bound parameters per row; stays well under SQLite's variable limit
        const BATCH_SIZE: usize = 50;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles \
                 (feed_id, title, link, description, image_url, publication_date, guid, read_status) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(feed_id)
                    .push_bind(&article.title)
                    .push_bind(&article.link)
                    .push_bind(&article.description)
                    .push_bind(&article.image_url)
                    .push_bind(article.publication_date.timestamp_millis())
                    .push_bind(&article.guid)
                    .push_bind(ReadStatus::Unread.as_i64());
            });

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted as usize)
    }

    pub async fn article_by_id(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let row: Option<ArticleDbRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"))
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Articles newest first, optionally limited to one feed and to articles
    /// that are not READ.
    pub async fn articles(
        &self,
        filter: FeedFilter,
        hide_read: bool,
        limit: Option<u32>,
    ) -> Result<Vec<Article>, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles"));
        push_scope(&mut builder, filter, hide_read);
        builder.push(" ORDER BY publication_date DESC, id ASC");
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Number of articles [`Database::articles`] would return without a limit.
    pub async fn article_count(
        &self,
        filter: FeedFilter,
        hide_read: bool,
    ) -> Result<i64, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM articles");
        push_scope(&mut builder, filter, hide_read);

        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Articles whose title or description contains `term`, newest first.
    ///
    /// Matching is a substring match, case-insensitive for ASCII.
    pub async fn search_articles(&self, term: &str) -> Result<Vec<SearchHit>, DatabaseError> {
        let rows: Vec<SearchRow> = sqlx::query_as(
            r#"
                SELECT
                    a.id, a.feed_id, a.title, a.link, a.description, a.image_url,
                    a.publication_date, a.guid, a.read_status,
                    f.name as feed_name
                FROM articles a
                JOIN feeds f ON f.id = a.feed_id
                WHERE instr(lower(a.title), lower(?)) > 0
                   OR instr(lower(a.description), lower(?)) > 0
                ORDER BY a.publication_date DESC, a.id ASC
            "#,
        )
        .bind(term)
        .bind(term)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                feed_name: row.feed_name,
                article: row.article.into_article(),
            })
            .collect())
    }

    // ========================================================================
    // Read State
    // ========================================================================

    /// UNREAD -> GREY. Articles already GREY or READ are left alone.
    ///
    /// Returns `true` if the article changed state.
    pub async fn mark_article_grey(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET read_status = ? WHERE id = ? AND read_status = ?")
            .bind(ReadStatus::Grey.as_i64())
            .bind(article_id)
            .bind(ReadStatus::Unread.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// GREY -> READ for every article at once. Returns the number finalized.
    pub async fn finalize_grey(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET read_status = ? WHERE read_status = ?")
            .bind(ReadStatus::Read.as_i64())
            .bind(ReadStatus::Grey.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Any -> READ for one feed or all feeds. Returns the number of articles changed.
    pub async fn mark_all_read(&self, filter: FeedFilter) -> Result<u64, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE articles SET read_status = ");
        builder.push_bind(ReadStatus::Read.as_i64());
        builder
            .push(" WHERE read_status != ")
            .push_bind(ReadStatus::Read.as_i64());
        if let Some(feed_id) = filter.feed_id() {
            builder.push(" AND feed_id = ").push_bind(feed_id);
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete every article published before `cutoff`, across all feeds.
    pub async fn remove_articles_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM articles WHERE publication_date < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DiscoveredFeed, Feed};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    async fn test_feed(db: &Database, n: u32) -> Feed {
        db.add_feed(&DiscoveredFeed {
            name: format!("Feed {n}"),
            url: format!("https://example.com/{n}.xml"),
        })
        .await
        .unwrap()
    }

    fn test_article(guid: &str, hours_ago: i64) -> ParsedArticle {
        ParsedArticle {
            title: format!("Title {guid}"),
            link: format!("https://example.com/{guid}"),
            description: format!("Description of {guid}"),
            image_url: None,
            publication_date: Utc::now() - Duration::hours(hours_ago),
            guid: guid.into(),
        }
    }

    fn statuses(articles: &[Article]) -> Vec<(String, ReadStatus)> {
        articles
            .iter()
            .map(|a| (a.guid.clone(), a.read_status))
            .collect()
    }

    #[tokio::test]
    async fn test_add_articles_insert() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;

        let count = db
            .add_articles(feed.id, &[test_article("a", 1), test_article("b", 2)])
            .await
            .unwrap();
        assert_eq!(count, 2);

        let stored = db.articles(FeedFilter::Feed(feed.id), false, None).await.unwrap();
        assert_eq!(
            statuses(&stored),
            vec![("a".into(), ReadStatus::Unread), ("b".into(), ReadStatus::Unread)]
        );
        assert_eq!(stored[0].description, "Description of a");
    }

    #[tokio::test]
    async fn test_add_articles_skips_known_guids() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        db.add_articles(feed.id, &[test_article("a", 1)]).await.unwrap();

        let count = db
            .add_articles(feed.id, &[test_article("b", 0), test_article("a", 1)])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.article_count(FeedFilter::All, false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_same_guid_in_different_feeds() {
        let db = test_db().await;
        let one = test_feed(&db, 1).await;
        let two = test_feed(&db, 2).await;

        db.add_articles(one.id, &[test_article("shared", 1)]).await.unwrap();
        let count = db.add_articles(two.id, &[test_article("shared", 1)]).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_add_articles_large_batch() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let batch: Vec<_> = (0..130).map(|i| test_article(&format!("g{i}"), i)).collect();

        assert_eq!(db.add_articles(feed.id, &batch).await.unwrap(), 130);
    }

    #[tokio::test]
    async fn test_add_articles_empty_batch() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        assert_eq!(db.add_articles(feed.id, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_articles_unknown_feed_rolls_back() {
        let db = test_db().await;
        let result = db.add_articles(999, &[test_article("a", 1)]).await;
        assert!(result.is_err());
        assert_eq!(db.article_count(FeedFilter::All, false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_in_later_batch_rolls_back_earlier_batches() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        sqlx::query(
            "CREATE TRIGGER reject_guid BEFORE INSERT ON articles \
             WHEN NEW.guid = 'g55' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        // 60 rows: the first batch of 50 inserts cleanly, the second fails
        let batch: Vec<_> = (0..60).map(|i| test_article(&format!("g{i}"), 1)).collect();
        assert!(db.add_articles(feed.id, &batch).await.is_err());
        assert_eq!(db.article_count(FeedFilter::All, false).await.unwrap(), 0);

        sqlx::query("DROP TRIGGER reject_guid").execute(&db.pool).await.unwrap();
        assert_eq!(db.add_articles(feed.id, &batch).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_latest_guid() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        assert_eq!(db.latest_guid(feed.id).await.unwrap(), None);

        db.add_articles(feed.id, &[test_article("newer", 1), test_article("older", 5)])
            .await
            .unwrap();
        assert_eq!(db.latest_guid(feed.id).await.unwrap().as_deref(), Some("newer"));

        // Same date: first inserted wins
        let now = Utc::now() + Duration::hours(1);
        let mut top = test_article("top", 0);
        top.publication_date = now;
        let mut below = test_article("below", 0);
        below.publication_date = now;
        db.add_articles(feed.id, &[top, below]).await.unwrap();
        assert_eq!(db.latest_guid(feed.id).await.unwrap().as_deref(), Some("top"));
    }

    #[tokio::test]
    async fn test_article_by_id_roundtrip() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let mut parsed = test_article("a", 1);
        parsed.image_url = Some("https://cdn.example.com/a.png".into());
        db.add_articles(feed.id, std::slice::from_ref(&parsed)).await.unwrap();

        let id = db.articles(FeedFilter::All, false, None).await.unwrap()[0].id;
        let article = db.article_by_id(id).await.unwrap().unwrap();
        assert_eq!(article.feed_id, feed.id);
        assert_eq!(article.image_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(
            article.publication_date.timestamp_millis(),
            parsed.publication_date.timestamp_millis()
        );
        assert_eq!(db.article_by_id(id + 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_state_lifecycle() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        db.add_articles(feed.id, &[test_article("a", 1), test_article("b", 2)])
            .await
            .unwrap();
        let ids: Vec<i64> = db
            .articles(FeedFilter::All, false, None)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();

        assert!(db.mark_article_grey(ids[0]).await.unwrap());
        assert!(!db.mark_article_grey(ids[0]).await.unwrap());

        // Hide-read still shows grey articles
        let visible = db.articles(FeedFilter::All, true, None).await.unwrap();
        assert_eq!(
            statuses(&visible),
            vec![("a".into(), ReadStatus::Grey), ("b".into(), ReadStatus::Unread)]
        );

        assert_eq!(db.finalize_grey().await.unwrap(), 1);
        let visible = db.articles(FeedFilter::All, true, None).await.unwrap();
        assert_eq!(statuses(&visible), vec![("b".into(), ReadStatus::Unread)]);
        assert_eq!(db.article_count(FeedFilter::All, true).await.unwrap(), 1);
        assert_eq!(db.article_count(FeedFilter::All, false).await.unwrap(), 2);

        // A read article never goes back to grey
        assert!(!db.mark_article_grey(ids[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_all_read_scoped_to_feed() {
        let db = test_db().await;
        let one = test_feed(&db, 1).await;
        let two = test_feed(&db, 2).await;
        db.add_articles(one.id, &[test_article("a", 1), test_article("b", 2)])
            .await
            .unwrap();
        db.add_articles(two.id, &[test_article("c", 1)]).await.unwrap();

        assert_eq!(db.mark_all_read(FeedFilter::Feed(one.id)).await.unwrap(), 2);
        assert_eq!(db.article_count(FeedFilter::Feed(one.id), true).await.unwrap(), 0);
        assert_eq!(db.article_count(FeedFilter::Feed(two.id), true).await.unwrap(), 1);

        assert_eq!(db.mark_all_read(FeedFilter::All).await.unwrap(), 1);
        assert_eq!(db.mark_all_read(FeedFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_articles_limit_and_order() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        db.add_articles(
            feed.id,
            &[test_article("old", 10), test_article("new", 1), test_article("mid", 5)],
        )
        .await
        .unwrap();

        let top: Vec<_> = db
            .articles(FeedFilter::All, false, Some(2))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.guid)
            .collect();
        assert_eq!(top, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_search_articles() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        let mut rust = test_article("rust", 1);
        rust.title = "Announcing Rust 2.0".into();
        let mut other = test_article("other", 2);
        other.description = "Mentions RUST in passing".into();
        db.add_articles(feed.id, &[rust, other, test_article("unrelated", 3)])
            .await
            .unwrap();

        let hits = db.search_articles("rust").await.unwrap();
        let guids: Vec<_> = hits.iter().map(|h| h.article.guid.as_str()).collect();
        assert_eq!(guids, vec!["rust", "other"]);
        assert_eq!(hits[0].feed_name, "Feed 1");

        assert!(db.search_articles("nothing matches").await.unwrap().is_empty());
        // LIKE wildcards are plain characters
        assert!(db.search_articles("%").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_articles_before() {
        let db = test_db().await;
        let feed = test_feed(&db, 1).await;
        db.add_articles(feed.id, &[test_article("fresh", 1), test_article("stale", 24 * 20)])
            .await
            .unwrap();

        let removed = db
            .remove_articles_before(Utc::now() - Duration::days(14))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let left: Vec<_> = db
            .articles(FeedFilter::All, false, None)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.guid)
            .collect();
        assert_eq!(left, vec!["fresh"]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grey(usize),
        Finalize,
        MarkAllRead,
        MarkFeedRead,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4).prop_map(Op::Grey),
            Just(Op::Finalize),
            Just(Op::MarkAllRead),
            Just(Op::MarkFeedRead),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_read_status_never_decreases(ops in prop::collection::vec(op_strategy(), 1..12)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let db = test_db().await;
                let feed = test_feed(&db, 1).await;
                let other = test_feed(&db, 2).await;
                db.add_articles(feed.id, &[test_article("a", 1), test_article("b", 2)]).await.unwrap();
                db.add_articles(other.id, &[test_article("c", 1), test_article("d", 2)]).await.unwrap();

                let ids: Vec<i64> = db
                    .articles(FeedFilter::All, false, None)
                    .await
                    .unwrap()
                    .iter()
                    .map(|a| a.id)
                    .collect();
                let mut previous: Vec<ReadStatus> = vec![ReadStatus::Unread; ids.len()];

                for op in ops {
                    match op {
                        Op::Grey(i) => { db.mark_article_grey(ids[i]).await.unwrap(); }
                        Op::Finalize => { db.finalize_grey().await.unwrap(); }
                        Op::MarkAllRead => { db.mark_all_read(FeedFilter::All).await.unwrap(); }
                        Op::MarkFeedRead => { db.mark_all_read(FeedFilter::Feed(feed.id)).await.unwrap(); }
                    }

                    for (slot, id) in ids.iter().enumerate() {
                        let now = db.article_by_id(*id).await.unwrap().unwrap().read_status;
                        assert!(now >= previous[slot], "article {} went from {:?} to {:?}", id, previous[slot], now);
                        previous[slot] = now;
                    }
                }
            });
        }
    }
}
