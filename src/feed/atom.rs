//! Atom 1.0 (RFC 4287). Elements are matched on namespace and local name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::parser::{read_feed_title, ItemFields, ParseError, Parser};
use super::xml::{Element, Token, XmlStream};
use crate::storage::{DiscoveredFeed, ParsedArticle};
use crate::util::clean_text;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

pub struct AtomParser;

#[async_trait]
impl Parser for AtomParser {
    fn is_item(&self, element: &Element) -> bool {
        element.is(Some(ATOM_NS), "entry")
    }

    async fn parse_feed(
        &self,
        address: &str,
        stream: &mut XmlStream,
    ) -> Result<DiscoveredFeed, ParseError> {
        // feed > title
        let name = read_feed_title(stream, Some(ATOM_NS), 1).await?;
        Ok(DiscoveredFeed {
            name,
            url: address.to_string(),
        })
    }

    async fn parse_article(&self, stream: &mut XmlStream) -> Result<ParsedArticle, ParseError> {
        let mut fields = ItemFields::default();
        let mut published = None;
        let mut summary = None;

        loop {
            let element = match stream.next_token().await? {
                Token::Start(element) => element,
                Token::End(_) => break,
                Token::Text(_) => continue,
                Token::EndOfDocument => return Err(ParseError::UnexpectedEnd("<entry>")),
            };

            if element.namespace.as_deref() != Some(ATOM_NS) {
                stream.skip_element().await?;
                continue;
            }

            match element.local_name.as_str() {
                "link" => {
                    // rel defaults to "alternate"
                    let rel = element.attribute("rel").unwrap_or("alternate");
                    if rel == "alternate" && fields.link.is_none() {
                        fields.link = element.attribute("href").map(|href| href.trim().to_string());
                    }
                    stream.skip_element().await?;
                }
                "title" => fields.title = Some(clean_text(&stream.read_text().await?)),
                "content" => fields.description = Some(clean_text(&stream.read_text().await?)),
                "summary" => summary = Some(clean_text(&stream.read_text().await?)),
                "id" => fields.guid = Some(clean_text(&stream.read_text().await?)),
                "updated" => {
                    let raw = stream.read_text().await?;
                    fields.published = Some(parse_timestamp(raw.trim())?);
                }
                "published" => {
                    let raw = stream.read_text().await?;
                    published = Some(parse_timestamp(raw.trim())?);
                }
                _ => stream.skip_element().await?,
            }
        }

        fields.published = fields.published.or(published);
        fields.description = fields.description.or(summary);
        fields.into_article()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| ParseError::MalformedDate(raw.to_string()))
}
