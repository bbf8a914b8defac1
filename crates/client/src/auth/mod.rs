//! Credential management
//!
//! This module provides:
//! - [`Credentials`] - Initial credential material for a client
//! - [`CredentialExchange`] - Refresh-token and API-key exchanges
//! - [`CredentialRefresher`] - Single-flight coordinator for fresh access tokens

mod exchange;
mod refresher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use exchange::{CredentialExchange, HttpCredentialExchange, TokenGrant};
pub use refresher::CredentialRefresher;

/// Credential material a client starts with
///
/// Any combination is valid: an API key alone logs in on first use, an
/// access/refresh pair is used until it needs refreshing, and with nothing
/// set requests go out unauthenticated.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Credentials from a long-lived API key
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Credentials from an access/refresh token pair
    pub fn tokens(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            api_key: None,
            access_token: Some(access_token.into()),
            refresh_token,
            expires_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
