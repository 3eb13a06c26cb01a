use crate::feed::fetcher::{feed_body, read_limited_bytes, BodyError};
use crate::feed::parser::{FeedFormat, ParseError};
use crate::storage::DiscoveredFeed;
use crate::util::{resolve_href, validate_address, AddressError};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

const MAX_DISCOVERY_SIZE: usize = 5 * 1024 * 1024; // 5MB

const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];
const FEED_CONTENT_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "text/xml",
    "application/xml",
];

/// `<link>`/`<a>` elements advertising an RSS or Atom alternate.
const FEED_LINK_SELECTOR: &str = r#"link[rel~="alternate"][type="application/rss+xml"],
    link[rel~="alternate"][type="application/atom+xml"],
    a[rel~="alternate"][type="application/rss+xml"],
    a[rel~="alternate"][type="application/atom+xml"]"#;

/// Errors that can occur during feed discovery.
///
/// Any of these aborts the whole discovery call; partial results are never
/// returned.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The provided address failed validation
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] AddressError),
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Neither an HTML page nor a feed document
    #[error("unsupported content type: {0:?}")]
    UnsupportedContentType(String),
    /// Response body exceeded the size limit
    #[error("response too large")]
    TooLarge,
    /// A feed document (given or advertised) could not be read
    #[error("not a readable feed: {0}")]
    Parse(#[from] ParseError),
}

impl DiscoveryError {
    fn from_body(err: BodyError) -> Self {
        match err {
            BodyError::TooLarge => DiscoveryError::TooLarge,
            BodyError::Network(e) => DiscoveryError::Network(e),
        }
    }
}

/// How a response should be handled, based on its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Feed,
    Other,
}

/// Resolves a user-supplied address to the feeds it offers.
///
/// A feed document yields exactly one feed. An HTML page is scanned for
/// alternate RSS/Atom links; every advertised feed is fetched and parsed so
/// that its name comes from the feed itself rather than the page. A page
/// advertising nothing yields an empty list.
///
/// # Errors
///
/// Returns [`DiscoveryError`] on validation failure, network error, non-2xx
/// status, oversized response, unsupported content type, or if the page or
/// any advertised feed cannot be parsed.
pub async fn resolve_feeds(
    client: &reqwest::Client,
    address: &str,
) -> Result<Vec<DiscoveredFeed>, DiscoveryError> {
    let url = validate_address(address)?;
    let response = get(client, &url).await?;
    let content_type = media_type(&response);

    match classify(&content_type) {
        ContentKind::Feed => {
            tracing::debug!(url = %url, content_type = %content_type, "Address is a feed");
            Ok(vec![read_feed(response, url.as_str()).await?])
        }
        ContentKind::Html => {
            let bytes = read_limited_bytes(response, MAX_DISCOVERY_SIZE)
                .await
                .map_err(DiscoveryError::from_body)?;
            let links = find_feed_links(&String::from_utf8_lossy(&bytes), &url);
            tracing::debug!(url = %url, advertised = links.len(), "Scanned page for feed links");

            let mut feeds = Vec::with_capacity(links.len());
            for link in links {
                let response = get(client, &link).await?;
                feeds.push(read_feed(response, link.as_str()).await?);
            }
            Ok(feeds)
        }
        ContentKind::Other => Err(DiscoveryError::UnsupportedContentType(content_type)),
    }
}

async fn get(client: &reqwest::Client, url: &Url) -> Result<reqwest::Response, DiscoveryError> {
    let response = client.get(url.as_str()).send().await?;
    if !response.status().is_success() {
        return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
    }
    Ok(response)
}

/// Content-Type without parameters, lowercased. Empty when absent.
fn media_type(response: &reqwest::Response) -> String {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    strip_parameters(header)
}

fn strip_parameters(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn classify(media_type: &str) -> ContentKind {
    if HTML_CONTENT_TYPES.contains(&media_type) {
        ContentKind::Html
    } else if FEED_CONTENT_TYPES.contains(&media_type) {
        ContentKind::Feed
    } else {
        ContentKind::Other
    }
}

/// Parses just enough of a feed response to name it.
async fn read_feed(
    response: reqwest::Response,
    address: &str,
) -> Result<DiscoveredFeed, DiscoveryError> {
    let mut stream = feed_body(response).map_err(DiscoveryError::from_body)?;
    let format = FeedFormat::detect(&mut stream).await?;
    Ok(format.parser().parse_feed(address, &mut stream).await?)
}

/// Advertised feed URLs on an HTML page, resolved against the page address,
/// in document order without duplicates.
fn find_feed_links(html: &str, page: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse(FEED_LINK_SELECTOR) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut links: Vec<Url> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        match resolve_href(page, href) {
            Some(url) if !links.contains(&url) => links.push(url),
            Some(_) => {}
            None => tracing::debug!(href = %href, "Ignoring unusable feed link"),
        }
    }
    links
}
