use crate::feed::opengraph::OpenGraph;
use crate::feed::parser::{FeedFormat, ParseError};
use crate::feed::xml::XmlStream;
use crate::storage::{Database, DatabaseError, Feed};
use futures::StreamExt;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::io::StreamReader;

pub(crate) const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while refreshing one feed.
///
/// Covers the whole per-feed sequence: store lookups, the HTTP fetch,
/// parsing, and the final insert.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, timeouts)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Declared or received body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    /// The feed was unsubscribed before its refresh task ran
    #[error("Feed is no longer subscribed: {0}")]
    UnknownFeed(String),
}

/// Failure while reading a response body, shared by feed, page and
/// discovery fetches.
#[derive(Debug, Error)]
pub enum BodyError {
    /// Declared or received body exceeded the size limit
    #[error("Response too large")]
    TooLarge,
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<BodyError> for FetchError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::TooLarge => FetchError::ResponseTooLarge,
            BodyError::Network(e) => FetchError::Network(e),
        }
    }
}

/// Outcome of one feed's refresh task.
#[derive(Debug)]
pub struct FeedRefresh {
    pub feed_id: i64,
    pub url: String,
    /// Number of new articles inserted, or the error that stopped the task
    pub result: Result<usize, FetchError>,
}

/// Builds the shared HTTP client. Timeouts apply per connection attempt and
/// per read; there is no overall request deadline.
pub fn build_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
}

/// Refreshes every feed concurrently, one task per feed.
///
/// Waits for all tasks before returning. A failing task is logged and its
/// error recorded in the returned [`FeedRefresh`]; it never affects the
/// other tasks. A panicking task is logged and omitted from the results.
/// Results are returned in completion order.
pub async fn refresh_all(
    db: &Database,
    client: &reqwest::Client,
    images: &OpenGraph,
    feeds: Vec<Feed>,
    max_age_days: u32,
) -> Vec<FeedRefresh> {
    let mut tasks = JoinSet::new();

    for feed in feeds {
        let db = db.clone();
        let client = client.clone();
        let images = images.clone();

        tasks.spawn(async move {
            let result = refresh_feed(&db, &client, &images, &feed, max_age_days).await;
            if let Err(e) = &result {
                tracing::error!(feed = %feed.url, error = %e, "Feed refresh failed");
            }
            FeedRefresh {
                feed_id: feed.id,
                url: feed.url,
                result,
            }
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(refresh) => results.push(refresh),
            Err(e) => tracing::error!(error = %e, "Feed refresh task aborted"),
        }
    }

    results
}

/// Fetches one feed and stores the articles newer than its watermark.
///
/// The watermark is the guid of the newest stored article. Parsing stops at
/// that guid or at the first article older than `max_age_days`, whichever
/// comes first. New articles are inserted in a single transaction.
///
/// # Errors
///
/// - [`FetchError::UnknownFeed`] - the feed's url is no longer in the store
/// - [`FetchError::Network`] / [`FetchError::HttpStatus`] - fetch failed
/// - [`FetchError::ResponseTooLarge`] - declared body over 10MB
/// - [`FetchError::Parse`] - document is not a readable RSS/Atom feed
/// - [`FetchError::Database`] - lookup or insert failed
pub async fn refresh_feed(
    db: &Database,
    client: &reqwest::Client,
    images: &OpenGraph,
    feed: &Feed,
    max_age_days: u32,
) -> Result<usize, FetchError> {
    let started = Instant::now();

    let feed_id = db
        .feed_id(&feed.url)
        .await?
        .ok_or_else(|| FetchError::UnknownFeed(feed.url.clone()))?;
    let latest_guid = db.latest_guid(feed_id).await?;

    let mut stream = open_feed(client, &feed.url).await?;
    let format = FeedFormat::detect(&mut stream).await?;
    let articles = format
        .parser()
        .parse_articles(
            &feed.url,
            &mut stream,
            max_age_days,
            latest_guid.as_deref(),
            images,
        )
        .await?;

    let inserted = db.add_articles(feed_id, &articles).await?;

    tracing::info!(
        feed = %feed.url,
        parsed = articles.len(),
        inserted = inserted,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Feed refreshed"
    );

    Ok(inserted)
}

/// Requests a feed document and returns a token stream over its body.
pub async fn open_feed(client: &reqwest::Client, url: &str) -> Result<XmlStream, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    Ok(feed_body(response)?)
}

/// Token stream over a feed response, refusing bodies that declare more
/// than [`MAX_FEED_SIZE`] up front.
pub(crate) fn feed_body(response: reqwest::Response) -> Result<XmlStream, BodyError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > MAX_FEED_SIZE as u64 {
            return Err(BodyError::TooLarge);
        }
    }

    Ok(stream_body(response, MAX_FEED_SIZE))
}

/// Feeds a response body into the XML tokenizer chunk by chunk.
///
/// Bodies without a usable Content-Length are cut off once more than
/// `limit` bytes have arrived; the tokenizer then reports an I/O error.
pub(crate) fn stream_body(response: reqwest::Response, limit: usize) -> XmlStream {
    let mut received = 0usize;
    let body = response.bytes_stream().map(move |chunk| {
        let chunk = chunk.map_err(io::Error::other)?;
        received = received.saturating_add(chunk.len());
        if received > limit {
            return Err(io::Error::other(format!("response exceeded {limit} bytes")));
        }
        Ok(chunk)
    });

    XmlStream::new(StreamReader::new(Box::pin(body)))
}

/// Reads a whole (HTML) response body, failing once it exceeds `limit`.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(BodyError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
