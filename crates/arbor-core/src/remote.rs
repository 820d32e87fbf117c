//! Transport abstraction for the graph store.
//!
//! The client never speaks HTTP itself. Implement [`RemoteStore`] to plug in
//! an actual HTTP library (with whatever auth and timeouts it needs), or an
//! in-memory double for tests.

use serde_json::Value;

use crate::types::Method;

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_SERVER_ERROR: u16 = 500;

/// One HTTP request against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Absolute URL or a path relative to the store root.
    pub path: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and decoded JSON body of one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Value>,
}

impl Response {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == STATUS_NOT_FOUND
    }
}

/// Executes a single HTTP verb call against the graph store.
///
/// Connection-level failures are reported as `Err` and propagate to the
/// caller unchanged; any HTTP status, including error statuses, is a
/// successful `Response`.
pub trait RemoteStore {
    fn send(&self, request: &Request) -> anyhow::Result<Response>;
}

/// Fixed human-readable reason for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unexpected Status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        assert!(Response::new(STATUS_OK, None).is_success());
        assert!(Response::new(STATUS_NO_CONTENT, None).is_success());
        assert!(!Response::new(STATUS_NOT_FOUND, None).is_success());
        assert!(Response::new(STATUS_NOT_FOUND, None).is_not_found());
    }

    #[test]
    fn reason_phrases() {
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(500), "Internal Server Error");
        assert_eq!(reason_phrase(299), "Unexpected Status");
    }
}
