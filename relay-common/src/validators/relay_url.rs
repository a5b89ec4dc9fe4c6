//! Relay URL validation
//!
//! Validates request URLs and derives the relay server they belong to.

use url::Url;

/// Validation error for relay URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayUrlError {
    /// URL is empty
    Empty,
    /// URL does not parse
    Malformed,
    /// Scheme is not http or https
    UnsupportedScheme,
    /// URL has no host component
    MissingHost,
}

impl std::fmt::Display for RelayUrlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "url is empty"),
            Self::Malformed => write!(f, "url is malformed"),
            Self::UnsupportedScheme => write!(f, "url scheme must be http or https"),
            Self::MissingHost => write!(f, "url has no host"),
        }
    }
}

/// Validate a request URL
///
/// Checks:
/// - Not empty
/// - Parses as an absolute URL
/// - Uses the `http` or `https` scheme
/// - Has a host
///
/// # Errors
///
/// Returns a `RelayUrlError` variant describing the validation failure.
pub fn validate_relay_url(url: &str) -> Result<Url, RelayUrlError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(RelayUrlError::Empty);
    }
    let parsed = Url::parse(trimmed).map_err(|_| RelayUrlError::Malformed)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RelayUrlError::UnsupportedScheme);
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(RelayUrlError::MissingHost);
    }
    Ok(parsed)
}

/// Relay server identity for a URL (`scheme://host[:port]`)
///
/// Pairings belong to a server, not to a route, so every path under the
/// same origin shares one pool.
pub fn relay_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}
