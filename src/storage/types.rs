use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feed database is locked by another feedsync process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A feed with this url is already subscribed
    #[error("Already subscribed to {0}")]
    DuplicateFeed(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Read State
// ============================================================================

/// Per-article read marker. Values only ever increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Unread,
    /// Displayed during the current viewing session, not yet finalized
    Grey,
    Read,
}

impl ReadStatus {
    pub(crate) const fn as_i64(self) -> i64 {
        match self {
            ReadStatus::Unread => 0,
            ReadStatus::Grey => 1,
            ReadStatus::Read => 2,
        }
    }

    /// Unknown stored values are treated as read.
    pub(crate) const fn from_i64(value: i64) -> Self {
        match value {
            0 => ReadStatus::Unread,
            1 => ReadStatus::Grey,
            _ => ReadStatus::Read,
        }
    }
}

/// Scope of a count, listing or bulk update: one feed, or every feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedFilter {
    #[default]
    All,
    Feed(i64),
}

impl FeedFilter {
    pub(crate) fn feed_id(self) -> Option<i64> {
        match self {
            FeedFilter::All => None,
            FeedFilter::Feed(id) => Some(id),
        }
    }
}

// ============================================================================
// Parser Output
// ============================================================================

/// A feed as read from its own document, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFeed {
    pub name: String,
    /// Address the document was fetched from
    pub url: String,
}

/// One item as read from a feed document, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArticle {
    pub title: String,
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
    pub publication_date: DateTime<Utc>,
    /// Unique within the owning feed
    pub guid: String,
}

// ============================================================================
// Rows
// ============================================================================

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
    pub publication_date: i64,
    pub guid: String,
    pub read_status: i64,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            link: self.link,
            description: self.description,
            image_url: self.image_url,
            publication_date: DateTime::from_timestamp_millis(self.publication_date)
                .unwrap_or_default(),
            guid: self.guid,
            read_status: ReadStatus::from_i64(self.read_status),
        }
    }
}

/// Search hit row: an article plus its feed's name
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SearchRow {
    #[sqlx(flatten)]
    pub article: ArticleDbRow,
    pub feed_name: String,
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    /// Unique across all feeds
    pub url: String,
}

/// A stored article
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub image_url: Option<String>,
    pub publication_date: DateTime<Utc>,
    pub guid: String,
    pub read_status: ReadStatus,
}

/// An article matched by a search, with the name of its feed
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub feed_name: String,
    pub article: Article,
}
