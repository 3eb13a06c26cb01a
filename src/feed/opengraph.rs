//! Preview images advertised by article pages through `<meta property="og:image">`.

use crate::feed::fetcher::{read_limited_bytes, FetchError};
use crate::util::{resolve_href, validate_address};
use scraper::{Html, Selector};

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Looks up open-graph images for article links.
///
/// Lookups never fail: any problem (bad link, network, missing tag) is
/// logged at debug level and reported as "no image".
#[derive(Debug, Clone, Default)]
pub struct OpenGraph {
    client: Option<reqwest::Client>,
}

impl OpenGraph {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// An instance that never fetches anything.
    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    pub async fn image_for(&self, link: &str) -> Option<String> {
        let client = self.client.as_ref()?;

        let page = match validate_address(link) {
            Ok(page) => page,
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "Skipping image lookup");
                return None;
            }
        };

        let html = match fetch_page(client, page.as_str()).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "Could not fetch page for og:image");
                return None;
            }
        };

        let image = extract_property(&html, "image")
            .and_then(|content| resolve_href(&page, &content))
            .map(String::from);
        if image.is_none() {
            tracing::debug!(link = %link, "Page has no og:image");
        }
        image
    }
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Content of the first non-empty `<meta property="og:{property}">` tag.
fn extract_property(html: &str, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property=\"og:{property}\"]")).ok()?;
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_owned)
}
