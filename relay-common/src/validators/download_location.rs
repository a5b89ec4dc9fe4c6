//! Download location validation
//!
//! Validates the local destination of a streamed download. The location
//! must survive percent-encoding into a path URL, so control characters
//! and NUL bytes are rejected up front.

use std::path::PathBuf;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

/// Maximum length for download locations in characters
pub const MAX_DOWNLOAD_LOCATION_LENGTH: usize = 4096;

/// Characters left untouched when encoding a URL path
const PATH_ALLOWED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'-')
    .remove(b'.')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'@')
    .remove(b'_')
    .remove(b'~');

/// Validation error for download locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadLocationError {
    /// Location is empty
    Empty,
    /// Location exceeds maximum length
    TooLong,
    /// Location contains null bytes
    ContainsNull,
    /// Location contains control characters
    InvalidCharacters,
    /// Percent-encoded location is not a valid path URL
    NotEncodable,
}

impl std::fmt::Display for DownloadLocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "download location is empty"),
            Self::TooLong => write!(f, "download location is too long"),
            Self::ContainsNull => write!(f, "download location contains a null byte"),
            Self::InvalidCharacters => write!(f, "download location contains control characters"),
            Self::NotEncodable => write!(f, "download location is not a valid path"),
        }
    }
}

/// Validate a download location
///
/// Checks:
/// - Not empty
/// - Does not exceed maximum length (4096 characters)
/// - No null bytes or control characters
/// - Percent-encodes into a valid path URL
///
/// Traversal (`..`) is not rejected here: the host picks the destination
/// and owns its file system policy.
///
/// # Errors
///
/// Returns a `DownloadLocationError` variant describing the validation failure.
pub fn validate_download_location(location: &str) -> Result<PathBuf, DownloadLocationError> {
    if location.is_empty() {
        return Err(DownloadLocationError::Empty);
    }
    if location.chars().count() > MAX_DOWNLOAD_LOCATION_LENGTH {
        return Err(DownloadLocationError::TooLong);
    }
    for ch in location.chars() {
        if ch == '\0' {
            return Err(DownloadLocationError::ContainsNull);
        }
        if ch.is_control() {
            return Err(DownloadLocationError::InvalidCharacters);
        }
    }

    let encoded = utf8_percent_encode(location, PATH_ALLOWED).to_string();
    let base = Url::parse("file:///").map_err(|_| DownloadLocationError::NotEncodable)?;
    base.join(&encoded)
        .map_err(|_| DownloadLocationError::NotEncodable)?;

    Ok(PathBuf::from(location))
}
