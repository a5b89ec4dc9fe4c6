//! Encrypted header name checks
//!
//! `headersToEncrypt` should name headers present in the request. Names
//! that match nothing are kept and passed through to the pairing engine,
//! where they have no effect; they are reported here so callers can
//! surface the mismatch without rejecting the request.

use std::collections::BTreeMap;

/// Result of matching `headersToEncrypt` against the request headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedHeaderNames {
    /// Names that match a request header (case-insensitive)
    pub matched: usize,
    /// Names that match no request header
    pub unmatched: usize,
}

/// Count which encrypted header names refer to present headers
///
/// Header names compare case-insensitively, as in HTTP. Only counts are
/// returned so that callers can log the outcome without echoing names.
pub fn split_encrypted_headers(
    headers: &BTreeMap<String, String>,
    names: &[String],
) -> EncryptedHeaderNames {
    let mut result = EncryptedHeaderNames::default();
    for name in names {
        if headers.keys().any(|key| key.eq_ignore_ascii_case(name)) {
            result.matched += 1;
        } else {
            result.unmatched += 1;
        }
    }
    result
}

/// Names of the headers that travel in cleartext
///
/// Headers named in `headersToEncrypt` are left out, so the result is safe
/// to log.
pub fn cleartext_header_names<'a>(
    headers: &'a BTreeMap<String, String>,
    names: &[String],
) -> Vec<&'a str> {
    headers
        .keys()
        .filter(|key| !names.iter().any(|name| name.eq_ignore_ascii_case(key)))
        .map(String::as_str)
        .collect()
}
