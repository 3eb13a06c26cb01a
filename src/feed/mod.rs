//! Feed parsing, discovery and fetching.
//!
//! - **Parsing**: streaming RSS 2.0 and Atom 1.0 parsers behind one [`Parser`]
//!   capability, picked by [`FeedFormat::detect`] from the root element
//! - **Discovery**: resolving a user-supplied address, feed or HTML page, to
//!   the feeds it offers
//! - **Fetching**: per-feed refresh tasks that stop at the stored watermark
//!
//! # Architecture
//!
//! - [`xml`] - pull tokenizer over a streaming `quick-xml` reader
//! - `parser` - the `Parser` trait, shared stop rules, format detection
//! - `rss` / `atom` - per-format element matching
//! - `opengraph` - preview images from article pages
//! - `fetcher` - HTTP plumbing and concurrent refresh
//! - `discovery` - content-type classification and autodiscovery
//!
//! # Example
//!
//! ```
//! use feedsync::feed::{FeedFormat, OpenGraph, XmlStream};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let doc = "<rss><channel><title>Example</title></channel></rss>";
//! let mut stream = XmlStream::from_bytes(doc);
//! let format = FeedFormat::detect(&mut stream).await.unwrap();
//! let feed = format.parser().parse_feed("https://example.com/rss", &mut stream).await.unwrap();
//! assert_eq!(feed.name, "Example");
//!
//! let articles = format
//!     .parser()
//!     .parse_articles("https://example.com/rss", &mut stream, 14, None, &OpenGraph::disabled())
//!     .await
//!     .unwrap();
//! assert!(articles.is_empty());
//! # }
//! ```

mod atom;
mod discovery;
mod fetcher;
mod opengraph;
mod parser;
mod rss;
pub mod xml;

pub use atom::ATOM_NS;
pub use discovery::{resolve_feeds, DiscoveryError};
pub use fetcher::{build_client, open_feed, refresh_all, refresh_feed, FeedRefresh, FetchError};
pub use opengraph::OpenGraph;
pub use parser::{age_cutoff, FeedFormat, ParseError, Parser};
pub use xml::XmlStream;
