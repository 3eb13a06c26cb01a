use thiserror::Error;
use url::Url;

/// Errors produced while validating a user-supplied feed address.
#[derive(Error, Debug)]
pub enum AddressError {
    /// The address string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The address uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The address has no host component.
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Validates an address before anything is fetched from it.
///
/// Accepts absolute `http`/`https` URLs with a host. Loopback and private
/// hosts are allowed: self-hosted feeds on a LAN are ordinary subscriptions.
///
/// ```
/// use feedsync::util::validate_address;
///
/// let url = validate_address("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_address("file:///etc/passwd").is_err());
/// assert!(validate_address("not a url").is_err());
/// ```
pub fn validate_address(address: &str) -> Result<Url, AddressError> {
    let url = Url::parse(address.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(AddressError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(AddressError::MissingHost(address.to_owned())),
    }
}

/// Resolves an `href` found on `page` into an absolute URL.
///
/// Absolute links are returned unchanged, root-relative ones inherit the
/// page's scheme, host and port, protocol-relative ones inherit its scheme.
/// Returns `None` when the result is not an http(s) URL.
pub fn resolve_href(page: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let resolved = page.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}
