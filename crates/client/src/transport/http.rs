//! Physical request execution
//!
//! [`HttpExecutor`] is the single-call primitive the transport wraps. It
//! performs exactly one network round trip and returns the response for any
//! status; classifying statuses into errors is the transport's job.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use tracing::trace;

use super::{Request, Response};
use crate::error::{ClientError, Result};

/// Executes one physical HTTP call
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Send `request`, authenticating with `bearer` when present
    ///
    /// Returns `Ok` for every status code; only transport-level failures
    /// (connection, timeout) are errors.
    async fn execute(&self, request: &Request, bearer: Option<&str>) -> Result<Response>;
}

/// [`HttpExecutor`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: ReqwestClient,
    base_url: String,
    default_timeout: Duration,
}

impl ReqwestExecutor {
    /// Create an executor for the given base URL
    pub fn new(base_url: &str, default_timeout: Duration) -> Result<Self> {
        let client = ReqwestClient::builder()
            .user_agent(concat!("jobline-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url, default_timeout))
    }

    /// Create an executor around an existing reqwest client
    pub fn with_client(client: ReqwestClient, base_url: &str, default_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &Request, bearer: Option<&str>) -> Result<Response> {
        let url = self.url_for(&request.path);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        trace!(method = %request.method, %url, "sending HTTP request");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        trace!(method = %request.method, %url, status, "received HTTP response");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
