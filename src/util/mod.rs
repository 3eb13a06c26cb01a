//! Small helpers shared by the feed and storage layers.
//!
//! - **Address handling**: validation of user-supplied URLs and resolution of
//!   relative links found in HTML pages
//! - **Sanitizing**: stripping control characters from feed-supplied text
//!
//! # Examples
//!
//! ```
//! use feedsync::util::{clean_text, validate_address};
//!
//! let url = validate_address("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! assert_eq!(clean_text("  Example\x1b[1m Blog "), "Example Blog");
//! ```

mod address;
mod sanitize;

pub use address::{resolve_href, validate_address, AddressError};
pub use sanitize::{clean_text, strip_control_chars};
