//! Pull-style XML token source used by the format parsers.
//!
//! Wraps a namespace-aware `quick-xml` reader over any `AsyncBufRead` and
//! hands out owned start-tag / text / end-tag tokens one at a time, so a
//! parser can stop at any point without having read the rest of the body.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::encoding::Decoder;
use quick_xml::NsReader;
use std::io::Cursor;
use tokio::io::AsyncBufRead;

use super::parser::ParseError;

/// Boxed byte source so network bodies and in-memory documents share one type.
type ByteSource = Box<dyn AsyncBufRead + Unpin + Send>;

/// A start tag with its namespace resolved and attributes decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Namespace URI, or `None` for elements in no namespace
    pub namespace: Option<String>,
    pub local_name: String,
    /// `(qualified name, value)` pairs in document order
    pub attributes: Vec<(String, String)>,
}

impl Element {
    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local_name == local_name
    }

    /// Value of an unprefixed attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Namespace-qualified name of a closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndTag {
    pub namespace: Option<String>,
    pub local_name: String,
}

impl EndTag {
    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local_name == local_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Start(Element),
    Text(String),
    End(EndTag),
    EndOfDocument,
}

/// Forward-only token stream over one XML document.
pub struct XmlStream {
    reader: NsReader<ByteSource>,
    buf: Vec<u8>,
    /// Closing half of a self-closing element, returned on the next call
    pending_end: Option<EndTag>,
    at_start: bool,
}

impl XmlStream {
    pub fn new<R>(source: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let boxed: ByteSource = Box::new(source);
        let reader = NsReader::from_reader(boxed);

        Self {
            reader,
            buf: Vec::new(),
            pending_end: None,
            at_start: true,
        }
    }

    /// Stream over an in-memory document.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// True until the first token has been handed out.
    pub fn at_start(&self) -> bool {
        self.at_start
    }

    /// Advances to the next start tag, text node, end tag or end of document.
    ///
    /// XML declarations, comments, processing instructions, doctypes and
    /// whitespace-only text are skipped. CDATA sections are reported as text.
    /// Text is decoded with the encoding named in the XML declaration.
    pub async fn next_token(&mut self) -> Result<Token, ParseError> {
        self.read_token(false).await
    }

    /// `keep_blank` reports whitespace-only text, which separates words
    /// inside mixed content.
    async fn read_token(&mut self, keep_blank: bool) -> Result<Token, ParseError> {
        self.at_start = false;

        if let Some(end) = self.pending_end.take() {
            return Ok(Token::End(end));
        }

        loop {
            let decoder = self.reader.decoder();
            self.buf.clear();

            let (resolved, event) = self
                .reader
                .read_resolved_event_into_async(&mut self.buf)
                .await?;
            let namespace = namespace_of(&resolved);

            match event {
                Event::Start(start) => {
                    return Ok(Token::Start(element(namespace, &start, decoder)?));
                }
                Event::Empty(start) => {
                    let element = element(namespace, &start, decoder)?;
                    self.pending_end = Some(EndTag {
                        namespace: element.namespace.clone(),
                        local_name: element.local_name.clone(),
                    });
                    return Ok(Token::Start(element));
                }
                Event::End(end) => {
                    return Ok(Token::End(EndTag {
                        namespace,
                        local_name: String::from_utf8_lossy(end.local_name().as_ref())
                            .into_owned(),
                    }));
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    // Indentation between elements
                    if keep_blank || !text.trim().is_empty() {
                        return Ok(Token::Text(text.into_owned()));
                    }
                }
                Event::CData(cdata) => {
                    let text = decoder.decode(&cdata).map_err(quick_xml::Error::from)?;
                    return Ok(Token::Text(text.into_owned()));
                }
                Event::Eof => return Ok(Token::EndOfDocument),
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            }
        }
    }

    /// Collects the text content up to the end tag that closes the element
    /// whose start tag was just returned. Nested markup is flattened.
    pub async fn read_text(&mut self) -> Result<String, ParseError> {
        let mut depth = 0usize;
        let mut text = String::new();

        loop {
            match self.read_token(true).await? {
                Token::Start(_) => depth += 1,
                Token::Text(chunk) => text.push_str(&chunk),
                Token::End(_) if depth == 0 => return Ok(text),
                Token::End(_) => depth -= 1,
                Token::EndOfDocument => return Err(ParseError::UnexpectedEnd("text element")),
            }
        }
    }

    /// Consumes the rest of the element whose start tag was just returned.
    pub async fn skip_element(&mut self) -> Result<(), ParseError> {
        let mut depth = 0usize;

        loop {
            match self.next_token().await? {
                Token::Start(_) => depth += 1,
                Token::Text(_) => {}
                Token::End(_) if depth == 0 => return Ok(()),
                Token::End(_) => depth -= 1,
                Token::EndOfDocument => return Err(ParseError::UnexpectedEnd("element")),
            }
        }
    }
}

fn namespace_of(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    }
}

fn element(
    namespace: Option<String>,
    start: &BytesStart<'_>,
    decoder: Decoder,
) -> Result<Element, ParseError> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.decode_and_unescape_value(decoder)?.into_owned();
        attributes.push((key, value));
    }

    Ok(Element {
        namespace,
        local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
    })
}
