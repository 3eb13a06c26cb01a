//! SQLite-backed feed store.
//!
//! Owns feed-url uniqueness, the per-feed guid uniqueness that makes
//! re-delivered items no-ops, and the three-state read marker.

mod articles;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Article, DatabaseError, DiscoveredFeed, Feed, FeedFilter, ParsedArticle, ReadStatus,
    SearchHit,
};
