//! RSS 2.0 (<https://www.rssboard.org/rss-specification>).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::parser::{read_feed_title, ItemFields, ParseError, Parser};
use super::xml::{Element, Token, XmlStream};
use crate::storage::{DiscoveredFeed, ParsedArticle};
use crate::util::clean_text;

/// RFC 822 with a numeric zone offset. Named zones fall through to RFC 2822.
const PUB_DATE_NUMERIC: &str = "%a, %d %b %Y %H:%M:%S %z";

pub struct RssParser;

#[async_trait]
impl Parser for RssParser {
    fn is_item(&self, element: &Element) -> bool {
        element.is(None, "item")
    }

    async fn parse_feed(
        &self,
        address: &str,
        stream: &mut XmlStream,
    ) -> Result<DiscoveredFeed, ParseError> {
        // rss > channel > title
        let name = read_feed_title(stream, None, 2).await?;
        Ok(DiscoveredFeed {
            name,
            url: address.to_string(),
        })
    }

    async fn parse_article(&self, stream: &mut XmlStream) -> Result<ParsedArticle, ParseError> {
        let mut fields = ItemFields::default();

        loop {
            let element = match stream.next_token().await? {
                Token::Start(element) => element,
                // Children are consumed whole, so the only end tag seen here is </item>
                Token::End(_) => return fields.into_article(),
                Token::Text(_) => continue,
                Token::EndOfDocument => return Err(ParseError::UnexpectedEnd("<item>")),
            };

            if element.namespace.is_some() {
                stream.skip_element().await?;
                continue;
            }

            match element.local_name.as_str() {
                "title" => fields.title = Some(clean_text(&stream.read_text().await?)),
                "link" => fields.link = Some(clean_text(&stream.read_text().await?)),
                "description" => fields.description = Some(clean_text(&stream.read_text().await?)),
                "guid" => fields.guid = Some(clean_text(&stream.read_text().await?)),
                "pubDate" => {
                    let raw = stream.read_text().await?;
                    fields.published = Some(parse_pub_date(raw.trim())?);
                }
                _ => stream.skip_element().await?,
            }
        }
    }
}

fn parse_pub_date(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_str(raw, PUB_DATE_NUMERIC)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| ParseError::MalformedDate(raw.to_string()))
}
