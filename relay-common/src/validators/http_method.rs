//! HTTP method validation

use serde::{Deserialize, Serialize};

/// HTTP methods accepted by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl HttpMethod {
    /// Canonical upper-case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
        }
    }

    /// Whether a request with this method must carry a body
    #[must_use]
    pub fn requires_body(&self) -> bool {
        crate::METHODS_REQUIRING_BODY.contains(&self.as_str())
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation error for HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethodError {
    /// Method is empty
    Empty,
    /// Method is not one the relay supports
    Unsupported,
}

impl std::fmt::Display for HttpMethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "method is empty"),
            Self::Unsupported => write!(f, "method is not supported"),
        }
    }
}

/// Validate an HTTP method name (case-insensitive)
///
/// # Errors
///
/// Returns an `HttpMethodError` variant describing the validation failure.
pub fn validate_http_method(method: &str) -> Result<HttpMethod, HttpMethodError> {
    let method = method.trim();
    if method.is_empty() {
        return Err(HttpMethodError::Empty);
    }
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(HttpMethod::Get),
        "POST" => Ok(HttpMethod::Post),
        "PUT" => Ok(HttpMethod::Put),
        "DELETE" => Ok(HttpMethod::Delete),
        "HEAD" => Ok(HttpMethod::Head),
        "OPTIONS" => Ok(HttpMethod::Options),
        "TRACE" => Ok(HttpMethod::Trace),
        "PATCH" => Ok(HttpMethod::Patch),
        _ => Err(HttpMethodError::Unsupported),
    }
}
