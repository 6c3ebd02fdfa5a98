//! Request ID propagation for request tracing.
//!
//! Requests keep the `X-Request-Id` they arrived with; otherwise a UUID is
//! generated so one logical request can be followed across retries and
//! backends in the logs.

use hyper::header::HeaderName;
use hyper::HeaderMap;
use uuid::Uuid;

/// Identifier carried by one logical request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Header the ID is read from and forwarded in.
    pub const HEADER: HeaderName = HeaderName::from_static("x-request-id");

    /// Create a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse the client's ID if it sent a usable one, otherwise generate one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&Self::HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
