//! Request/response value objects

use std::collections::HashMap;
use std::time::Duration;

pub use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// An outbound API call, created per logical operation
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path relative to the client's base URL (e.g. `/jobs/abc/complete`)
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Caller asserts that repeating this request has no extra side effects
    pub idempotent: bool,
    /// Per-attempt timeout override
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request for the given method and path
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            idempotent: false,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Attach an already-built JSON value as the body
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Mark the request safe to retry regardless of method
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the retry loop may repeat this request
    ///
    /// Safe methods always qualify; POST/PUT/PATCH/DELETE only when the
    /// caller marked the request idempotent.
    pub fn is_retryable(&self) -> bool {
        self.idempotent
            || self.method == Method::GET
            || self.method == Method::HEAD
            || self.method == Method::OPTIONS
    }
}

/// Join raw path segments into a request path, percent-encoding each one
///
/// ```ignore
/// assert_eq!(encode_path(["jobs", "a/b", "complete"])?, "/jobs/a%2Fb/complete");
/// ```
pub fn encode_path<I>(segments: I) -> Result<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = reqwest::Url::parse("http://localhost/")
        .map_err(|e| ClientError::Configuration(format!("invalid path base: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ClientError::Configuration("URL cannot carry a path".into()))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}

/// A received response, buffered in full
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ClientError::Serialization(format!("failed to decode response body: {e}"))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
