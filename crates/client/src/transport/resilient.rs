//! Resilient request execution
//!
//! Every API call passes through [`Transport::execute`]:
//!
//! ```text
//! circuit check ─► proactive refresh ─► physical call ─┬─► success
//!                                                      ├─► 401: refresh once, re-issue
//!                                                      └─► retryable: backoff, loop
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{HttpExecutor, ReqwestExecutor, Request, Response};
use crate::auth::{CredentialRefresher, HttpCredentialExchange};
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorKind, Result};
use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, RetryPolicy};

/// Retrying, circuit-guarded, credential-aware request executor
///
/// Safe to share across tasks; the breaker and the refresher are the only
/// shared mutable state and each serializes its own transitions.
///
/// # Example
///
/// ```ignore
/// let transport = Transport::from_config(&ClientConfig::from_env())?;
///
/// let response = transport
///     .execute(Request::post("/jobs/42/complete").with_body(json!({})).idempotent())
///     .await?;
/// ```
pub struct Transport {
    executor: Arc<dyn HttpExecutor>,
    retry: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    credentials: Option<Arc<CredentialRefresher>>,
    auto_refresh: bool,
    max_auth_retries: u32,
}

impl Transport {
    /// Create a transport with the default retry policy and no breaker or
    /// credentials
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self {
            executor,
            retry: RetryPolicy::default(),
            breaker: None,
            credentials: None,
            auto_refresh: true,
            max_auth_retries: 1,
        }
    }

    /// Build the full stack (reqwest executor, breaker, refresher) from
    /// client configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let executor: Arc<dyn HttpExecutor> =
            Arc::new(ReqwestExecutor::new(&config.base_url, config.request_timeout)?);

        let mut transport = Self::new(Arc::clone(&executor))
            .with_retry_policy(config.retry.clone())
            .with_auto_refresh(config.auto_refresh)
            .with_max_auth_retries(config.max_auth_retries);

        if let Some(breaker) = &config.circuit_breaker {
            transport = transport.with_circuit_breaker(breaker.clone());
        }

        if !config.credentials.is_empty() {
            let exchange = Arc::new(HttpCredentialExchange::new(executor));
            let refresher = CredentialRefresher::new(config.credentials.clone(), exchange)
                .with_safety_margin(config.refresh_margin);
            transport = transport.with_credentials(Arc::new(refresher));
        }

        Ok(transport)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Guard calls with a new circuit breaker
    pub fn with_circuit_breaker(self, config: CircuitBreakerConfig) -> Self {
        self.with_breaker(Arc::new(CircuitBreaker::new(config)))
    }

    /// Guard calls with an existing (possibly shared) circuit breaker
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_credentials(mut self, refresher: Arc<CredentialRefresher>) -> Self {
        self.credentials = Some(refresher);
        self
    }

    /// Enable or disable the proactive refresh before each request
    pub fn with_auto_refresh(mut self, enabled: bool) -> Self {
        self.auto_refresh = enabled;
        self
    }

    /// How many 401 -> refresh -> re-issue cycles one logical request may do
    pub fn with_max_auth_retries(mut self, max: u32) -> Self {
        self.max_auth_retries = max;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn credentials(&self) -> Option<&Arc<CredentialRefresher>> {
        self.credentials.as_ref()
    }

    pub fn breaker_metrics(&self) -> Option<CircuitBreakerMetrics> {
        self.breaker.as_ref().map(|b| b.metrics())
    }

    /// Execute a request
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Execute a request and decode the JSON response body
    pub async fn execute_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.execute(request).await?.json()
    }

    /// Execute a request, aborting between or during attempts when `cancel`
    /// fires
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                debug!("Circuit open, failing fast");
                return Err(ClientError::CircuitOpen);
            }
        }

        if self.auto_refresh {
            self.refresh_proactively(cancel).await?;
        }

        let retryable_request = request.is_retryable();
        let mut attempt: u32 = 0;
        let mut auth_retries: u32 = 0;

        loop {
            let token = self.credentials.as_ref().and_then(|c| c.access_token());

            let result = tokio::select! {
                result = self.executor.execute(&request, token.as_deref()) => result,
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            };
            let result = result.and_then(|response| {
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(ClientError::from_response(&response))
                }
            });

            let err = match result {
                Ok(response) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    return Ok(response);
                }
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Authentication && auth_retries < self.max_auth_retries {
                if let Some(credentials) = self.credentials.as_ref().filter(|c| c.can_refresh()) {
                    auth_retries += 1;
                    match credentials.refresh_rejected(token.as_deref(), cancel).await {
                        Ok(()) => {
                            debug!(attempt, "Re-issuing request with refreshed credential");
                            continue;
                        }
                        Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                        Err(refresh_err) => {
                            warn!(error = %refresh_err, "Reactive credential refresh failed");
                        }
                    }
                }
            }

            if err.counts_as_breaker_failure() {
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
            }

            if !err.is_retryable() || !retryable_request || !self.retry.should_retry(attempt) {
                debug!(attempt, error = %err, "Request failed");
                return Err(err);
            }

            let delay = self.backoff_delay(attempt, &err);
            warn!(
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            }
            attempt += 1;
        }
    }

    async fn refresh_proactively(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(credentials) = &self.credentials else {
            return Ok(());
        };

        match credentials.ensure_fresh(cancel).await {
            Ok(()) => Ok(()),
            Err(ClientError::Cancelled) => Err(ClientError::Cancelled),
            // A token inside the safety margin may still be accepted
            Err(e) if credentials.access_token().is_some() => {
                warn!(error = %e, "Proactive refresh failed, using current credential");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Backoff for `attempt`, stretched to the server's `Retry-After` hint
    ///
    /// The hint is capped at the policy's `max_delay` so a single header
    /// cannot park a request for hours.
    fn backoff_delay(&self, attempt: u32, err: &ClientError) -> Duration {
        let delay = self.retry.delay(attempt);
        match err.retry_after() {
            Some(retry_after) => delay.max(retry_after.min(self.retry.max_delay)),
            None => delay,
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("credentials", &self.credentials)
            .field("auto_refresh", &self.auto_refresh)
            .field("max_auth_retries", &self.max_auth_retries)
            .finish()
    }
}
