//! Error taxonomy for the Jobline client
//!
//! Every failure surfaced by the transport is classified into a fixed set of
//! kinds so retry, circuit-breaker and caller logic can branch on
//! [`ErrorKind`] rather than on raw status codes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::Response;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Flat error classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    CircuitOpen,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    Validation,
    PayloadTooLarge,
    RateLimit,
    Server,
    Unknown,
    Cancelled,
    Configuration,
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
            Self::Serialization => "serialization",
        };
        f.write_str(name)
    }
}

/// Error body returned by the remote API
///
/// Accepts both `{code, message, details}` and the alternate `{error}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status code of the response
    pub status: u16,

    /// Machine-readable error code, when the server sent one
    pub code: Option<String>,

    /// Human-readable message
    pub message: String,

    /// Additional structured details
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

impl ApiError {
    /// Build an API error from a status code and raw response body
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        let parsed = serde_json::from_slice::<ErrorBody>(body).ok();

        let (code, message, details) = match parsed {
            Some(ErrorBody {
                code,
                message: Some(message),
                details,
                ..
            }) => (code, message, details),
            Some(ErrorBody {
                code,
                error: Some(error),
                details,
                ..
            }) => {
                let message = match error {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (code, message, details)
            }
            Some(ErrorBody { code, details, .. }) => (code, default_message(status), details),
            None => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let message = if text.is_empty() {
                    default_message(status)
                } else {
                    text
                };
                (None, message, None)
            }
        };

        Self {
            status,
            code,
            message,
            details,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({}, status {})", self.message, code, self.status),
            None => write!(f, "{} (status {})", self.message, self.status),
        }
    }
}

fn default_message(status: u16) -> String {
    format!("request failed with status {status}")
}

/// Rate-limit information parsed from response headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// How long the server asked us to wait
    pub retry_after: Option<Duration>,

    /// Request quota for the current window
    pub limit: Option<u64>,

    /// Requests remaining in the current window
    pub remaining: Option<u64>,

    /// When the current window resets
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    /// Parse rate-limit headers (names are expected lower-cased)
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let number = |name: &str| headers.get(name).and_then(|v| v.trim().parse::<u64>().ok());

        let retry_after = headers.get("retry-after").and_then(|v| parse_retry_after(v));
        let reset = number("x-ratelimit-reset").and_then(|secs| {
            Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single()
        });

        Self {
            retry_after,
            limit: number("x-ratelimit-limit"),
            remaining: number("x-ratelimit-remaining"),
            reset,
        }
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

/// Errors returned by every public client operation
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Connection-level failure (DNS, refused, reset, TLS)
    #[error("network error: {0}")]
    Network(String),

    /// The physical call did not finish within its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The circuit breaker rejected the call without touching the network
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// 401
    #[error("authentication failed: {0}")]
    Authentication(ApiError),

    /// 403
    #[error("not authorized: {0}")]
    Authorization(ApiError),

    /// 404
    #[error("not found: {0}")]
    NotFound(ApiError),

    /// 409
    #[error("conflict: {0}")]
    Conflict(ApiError),

    /// 400 / 422
    #[error("validation failed: {0}")]
    Validation(ApiError),

    /// 413
    #[error("payload too large: {0}")]
    PayloadTooLarge(ApiError),

    /// 429
    #[error("rate limited: {error}")]
    RateLimit {
        error: ApiError,
        rate_limit: RateLimitInfo,
    },

    /// 5xx
    #[error("server error: {0}")]
    Server(ApiError),

    /// Any other non-success status
    #[error("unexpected response: {0}")]
    Unknown(ApiError),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// No credential material is available to authenticate
    #[error("no credentials available: {0}")]
    NoCredentials(String),

    /// Invalid client configuration
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Request or response body could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Classify a non-success response
    pub fn from_response(response: &Response) -> Self {
        let error = ApiError::from_body(response.status, &response.body);
        match response.status {
            400 | 422 => Self::Validation(error),
            401 => Self::Authentication(error),
            403 => Self::Authorization(error),
            404 => Self::NotFound(error),
            409 => Self::Conflict(error),
            413 => Self::PayloadTooLarge(error),
            429 => Self::RateLimit {
                error,
                rate_limit: RateLimitInfo::from_headers(&response.headers),
            },
            500..=599 => Self::Server(error),
            _ => Self::Unknown(error),
        }
    }

    /// Get the taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Authentication(_) | Self::NoCredentials(_) => ErrorKind::Authentication,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Server(_) => ErrorKind::Server,
            Self::Unknown(_) => ErrorKind::Unknown,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the generic retry loop may try again after this error
    ///
    /// Authentication errors are not retryable here; the transport handles
    /// them separately with a credential refresh.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server | ErrorKind::RateLimit
        )
    }

    /// Whether this error indicates the remote service is unavailable
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server
        )
    }

    /// HTTP status code, if the error came from a response
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|e| e.status)
    }

    /// The parsed error body, if the error came from a response
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Authentication(e)
            | Self::Authorization(e)
            | Self::NotFound(e)
            | Self::Conflict(e)
            | Self::Validation(e)
            | Self::PayloadTooLarge(e)
            | Self::Server(e)
            | Self::Unknown(e) => Some(e),
            Self::RateLimit { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Server-requested wait before retrying, for rate-limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { rate_limit, .. } => rate_limit.retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else if err.is_builder() {
            Self::Configuration(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
