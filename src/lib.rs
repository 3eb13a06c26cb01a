//! Feed synchronization engine for RSS 2.0 and Atom 1.0 subscriptions.
//!
//! [`engine::FeedEngine`] is the entry point: it resolves addresses to feeds,
//! keeps subscriptions in a SQLite store, refreshes every feed concurrently
//! with an incremental watermark, and tracks a three-state read marker per
//! article.

pub mod config;
pub mod engine;
pub mod feed;
pub mod storage;
pub mod util;
