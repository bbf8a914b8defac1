//! Credential exchange against the auth endpoints

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ClientError, Result};
use crate::transport::{HttpExecutor, Request};

/// Credentials returned by a login or refresh exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,

    /// Present when the server rotates (or first issues) a refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Absolute expiry of the access token, preferred over `expires_in`
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenGrant {
    /// Resolve the absolute expiry relative to `now`
    ///
    /// A lifetime that does not fit in a timestamp is a malformed grant.
    pub fn expiry(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if let Some(at) = self.expires_at {
            return Ok(Some(at));
        }
        let Some(secs) = self.expires_in else {
            return Ok(None);
        };
        ChronoDuration::try_seconds(secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .map(Some)
            .ok_or_else(|| {
                ClientError::Serialization(format!("token lifetime out of range: {secs}s"))
            })
    }
}

/// Network exchanges that mint access credentials
///
/// Implementations perform exactly one call per method and must not route
/// through the retrying transport.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Full re-authentication with the long-lived API key
    async fn login(&self, api_key: &str) -> Result<TokenGrant>;
}

/// [`CredentialExchange`] over `POST /auth/refresh` and `POST /auth/login`
pub struct HttpCredentialExchange {
    executor: Arc<dyn HttpExecutor>,
}

impl HttpCredentialExchange {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self { executor }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<TokenGrant> {
        let request = Request::post(path).with_body(body);
        let response = self.executor.execute(&request, None).await?;

        if !response.is_success() {
            return Err(ClientError::from_response(&response));
        }
        response.json()
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchange {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.post("/auth/refresh", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn login(&self, api_key: &str) -> Result<TokenGrant> {
        self.post("/auth/login", json!({ "api_key": api_key })).await
    }
}
