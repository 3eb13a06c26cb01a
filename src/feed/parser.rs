use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;

use super::atom::AtomParser;
use super::opengraph::OpenGraph;
use super::rss::RssParser;
use super::xml::{Element, Token, XmlStream};
use crate::storage::{DiscoveredFeed, ParsedArticle};

/// Open-graph lookups run at most this many pages at a time per feed.
const IMAGE_LOOKUP_CONCURRENCY: usize = 4;

/// Errors raised while reading a feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// Root element is neither `<rss>` nor `<feed>`
    #[error("Unrecognized feed format: root element <{0}>")]
    UnrecognizedFormat(String),
    /// Format detection was attempted on a stream that has already been read
    #[error("Stream is not positioned at the start of the document")]
    NotAtStart,
    #[error("Malformed date: {0:?}")]
    MalformedDate(String),
    /// An item lacks a field the store requires
    #[error("Item is missing required <{0}>")]
    MissingField(&'static str),
    #[error("Feed has no title")]
    MissingTitle,
    /// The document ended inside an open element
    #[error("Document ended inside {0}")]
    UnexpectedEnd(&'static str),
}

/// One wire format's token-matching rules.
///
/// Implementations only know how to recognize their own elements; the
/// incremental stop rules live in [`Parser::parse_articles`] and are shared.
#[async_trait]
pub trait Parser: Send + Sync {
    /// True when `element` opens one item of this format.
    fn is_item(&self, element: &Element) -> bool;

    /// Reads up to the feed-level title and returns without consuming
    /// anything past its closing tag.
    ///
    /// Expects the root element to have been consumed already (see
    /// [`FeedFormat::detect`]).
    async fn parse_feed(
        &self,
        address: &str,
        stream: &mut XmlStream,
    ) -> Result<DiscoveredFeed, ParseError>;

    /// Reads one item. The stream must be positioned just after the item's
    /// start tag; on return it is positioned just after the matching end tag.
    async fn parse_article(&self, stream: &mut XmlStream) -> Result<ParsedArticle, ParseError>;

    /// Collects items newest-first until one of them is already stored or
    /// too old.
    ///
    /// Collection stops, without reading further, at the first item whose
    /// guid equals `latest_guid` or whose publication date is more than
    /// `max_age_days` before now. Everything collected before that point is
    /// returned in document order. Open-graph images are looked up only for
    /// the returned items.
    async fn parse_articles(
        &self,
        address: &str,
        stream: &mut XmlStream,
        max_age_days: u32,
        latest_guid: Option<&str>,
        images: &OpenGraph,
    ) -> Result<Vec<ParsedArticle>, ParseError> {
        let cutoff = age_cutoff(max_age_days);
        let mut articles = Vec::new();

        loop {
            match stream.next_token().await? {
                Token::Start(element) if self.is_item(&element) => {
                    let article = self.parse_article(stream).await?;

                    if latest_guid == Some(article.guid.as_str()) {
                        tracing::debug!(feed = %address, guid = %article.guid, "Reached stored watermark");
                        break;
                    }
                    if article.publication_date < cutoff {
                        tracing::debug!(
                            feed = %address,
                            published = %article.publication_date,
                            "Reached age cutoff"
                        );
                        break;
                    }
                    articles.push(article);
                }
                Token::EndOfDocument => break,
                _ => {}
            }
        }

        Ok(attach_images(articles, images).await)
    }
}

/// Oldest publication date still inside the retention window.
pub fn age_cutoff(max_age_days: u32) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(Duration::days(i64::from(max_age_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Looks up preview images for accepted articles, keeping document order.
async fn attach_images(articles: Vec<ParsedArticle>, images: &OpenGraph) -> Vec<ParsedArticle> {
    if !images.is_enabled() {
        return articles;
    }

    stream::iter(articles)
        .map(|mut article| async move {
            article.image_url = images.image_for(&article.link).await;
            article
        })
        .buffered(IMAGE_LOOKUP_CONCURRENCY)
        .collect()
        .await
}

/// The wire formats the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

static RSS_PARSER: RssParser = RssParser;
static ATOM_PARSER: AtomParser = AtomParser;

impl FeedFormat {
    /// Reads the root element and picks the matching format.
    ///
    /// The stream must not have been read from yet. On success it is left
    /// just inside the root element, ready for [`Parser::parse_feed`] or
    /// [`Parser::parse_articles`].
    pub async fn detect(stream: &mut XmlStream) -> Result<Self, ParseError> {
        if !stream.at_start() {
            return Err(ParseError::NotAtStart);
        }

        match stream.next_token().await? {
            Token::Start(root) => match root.local_name.as_str() {
                "rss" => Ok(FeedFormat::Rss),
                "feed" => Ok(FeedFormat::Atom),
                other => Err(ParseError::UnrecognizedFormat(other.to_string())),
            },
            Token::Text(_) | Token::End(_) => {
                Err(ParseError::UnrecognizedFormat("(text)".to_string()))
            }
            Token::EndOfDocument => Err(ParseError::UnrecognizedFormat("(empty)".to_string())),
        }
    }

    pub fn parser(self) -> &'static dyn Parser {
        match self {
            FeedFormat::Rss => &RSS_PARSER,
            FeedFormat::Atom => &ATOM_PARSER,
        }
    }
}

/// Reads a feed-level title: the first `title` element that is a direct
/// child of `container_depth`, where the root element is depth 1.
pub(super) async fn read_feed_title(
    stream: &mut XmlStream,
    namespace: Option<&str>,
    container_depth: usize,
) -> Result<String, ParseError> {
    let mut depth = 1usize;

    loop {
        match stream.next_token().await? {
            Token::Start(element) => {
                if depth == container_depth && element.is(namespace, "title") {
                    let title = crate::util::clean_text(&stream.read_text().await?);
                    if title.is_empty() {
                        return Err(ParseError::MissingTitle);
                    }
                    return Ok(title);
                }
                depth += 1;
            }
            Token::End(_) => {
                if depth == 1 {
                    return Err(ParseError::MissingTitle);
                }
                depth -= 1;
            }
            Token::Text(_) => {}
            Token::EndOfDocument => return Err(ParseError::MissingTitle),
        }
    }
}

/// Per-item field accumulator shared by the format parsers.
#[derive(Debug, Default)]
pub(super) struct ItemFields {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub guid: Option<String>,
}

impl ItemFields {
    pub fn into_article(self) -> Result<ParsedArticle, ParseError> {
        let title = self.title.ok_or(ParseError::MissingField("title"))?;
        let publication_date = self.published.ok_or(ParseError::MissingField("date"))?;
        let link = self.link.unwrap_or_default();
        let guid = match self.guid {
            Some(guid) if !guid.is_empty() => guid,
            _ if !link.is_empty() => link.clone(),
            _ => return Err(ParseError::MissingField("guid")),
        };

        Ok(ParsedArticle {
            title,
            link,
            description: self.description.unwrap_or_default(),
            image_url: None,
            publication_date,
            guid,
        })
    }
}
