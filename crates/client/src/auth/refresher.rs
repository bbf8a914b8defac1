//! Single-flight credential refresh
//!
//! At most one exchange runs at a time. The exchange is driven by a detached
//! task so it completes even if the caller that triggered it goes away; every
//! caller (including the trigger) waits on a shared watch channel for the
//! outcome, or returns early when its own cancellation token fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CredentialExchange, Credentials, TokenGrant};
use crate::error::{ClientError, ErrorKind, Result};

type RefreshOutcome = std::result::Result<(), ClientError>;
type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

/// Credential material, mutated only under the refresher's lock
#[derive(Debug)]
struct CredentialState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    api_key: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    /// Outcome channel of the refresh currently underway
    inflight: Option<OutcomeReceiver>,
}

impl CredentialState {
    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() || self.api_key.is_some()
    }

    fn is_stale(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        if !self.can_refresh() {
            return false;
        }
        match (&self.access_token, self.expires_at) {
            (None, _) => true,
            (Some(_), Some(expires_at)) => {
                let remaining = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
                remaining <= margin
            }
            (Some(_), None) => false,
        }
    }

    /// Install a grant; a malformed grant leaves every field untouched
    fn apply(&mut self, grant: &TokenGrant, now: DateTime<Utc>) -> Result<()> {
        let expires_at = grant.expiry(now)?;
        self.access_token = Some(grant.access_token.clone());
        self.expires_at = expires_at;
        if let Some(refresh_token) = &grant.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<CredentialState>,
    exchange: Arc<dyn CredentialExchange>,
    refresh_count: AtomicU64,
}

impl Shared {
    async fn exchange_tokens(
        &self,
        refresh_token: Option<String>,
        api_key: Option<String>,
    ) -> Result<TokenGrant> {
        match (refresh_token, api_key) {
            (Some(refresh_token), api_key) => match self.exchange.refresh(&refresh_token).await {
                Ok(grant) => Ok(grant),
                Err(e) if e.kind() == ErrorKind::Authentication => match api_key {
                    Some(api_key) => {
                        warn!(error = %e, "Refresh token rejected, re-authenticating with API key");
                        self.exchange.login(&api_key).await
                    }
                    None => Err(e),
                },
                Err(e) => Err(e),
            },
            (None, Some(api_key)) => self.exchange.login(&api_key).await,
            (None, None) => Err(ClientError::NoCredentials(
                "no refresh token or API key configured".into(),
            )),
        }
    }
}

enum Gate {
    Fresh,
    Wait(OutcomeReceiver),
}

/// Coordinates access-credential refresh for every caller of a client
///
/// # Example
///
/// ```ignore
/// let refresher = CredentialRefresher::new(Credentials::api_key("key"), exchange);
///
/// refresher.ensure_fresh(&CancellationToken::new()).await?;
/// let token = refresher.access_token();
/// ```
pub struct CredentialRefresher {
    shared: Arc<Shared>,
    safety_margin: Duration,
}

impl CredentialRefresher {
    /// Default window before expiry in which a proactive refresh happens
    pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

    pub fn new(credentials: Credentials, exchange: Arc<dyn CredentialExchange>) -> Self {
        let state = CredentialState {
            access_token: credentials.access_token,
            refresh_token: credentials.refresh_token,
            api_key: credentials.api_key,
            expires_at: credentials.expires_at,
            inflight: None,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                exchange,
                refresh_count: AtomicU64::new(0),
            }),
            safety_margin: Self::DEFAULT_SAFETY_MARGIN,
        }
    }

    /// Set how long before expiry a proactive refresh kicks in
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.shared.state.lock().access_token.clone()
    }

    /// Expiry of the current access token, if known
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().expires_at
    }

    /// Whether a refresh or API key is available to mint new tokens
    pub fn can_refresh(&self) -> bool {
        self.shared.state.lock().can_refresh()
    }

    /// Number of exchanges started so far
    pub fn refresh_count(&self) -> u64 {
        self.shared.refresh_count.load(Ordering::Relaxed)
    }

    /// Refresh if the access token is missing or within the safety margin
    /// of expiry; waits for an in-flight refresh either way
    pub async fn ensure_fresh(&self, cancel: &CancellationToken) -> Result<()> {
        let margin = self.safety_margin;
        let gate = self.gate(|state| state.is_stale(Utc::now(), margin));
        self.wait(gate, cancel).await
    }

    /// Refresh unconditionally (joining one already underway)
    pub async fn force_refresh(&self, cancel: &CancellationToken) -> Result<()> {
        let gate = self.gate(|_| true);
        self.wait(gate, cancel).await
    }

    /// Refresh after the server rejected `rejected`
    ///
    /// If the current token already differs from the rejected one, another
    /// caller refreshed in the meantime and no new exchange is started.
    pub async fn refresh_rejected(
        &self,
        rejected: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let gate = self.gate(|state| state.access_token.as_deref() == rejected);
        self.wait(gate, cancel).await
    }

    fn gate(&self, needs_refresh: impl FnOnce(&CredentialState) -> bool) -> Gate {
        let mut state = self.shared.state.lock();

        if let Some(rx) = &state.inflight {
            return Gate::Wait(rx.clone());
        }
        if !needs_refresh(&state) {
            return Gate::Fresh;
        }

        let (tx, rx) = watch::channel(None);
        state.inflight = Some(rx.clone());
        let refresh_token = state.refresh_token.clone();
        let api_key = state.api_key.clone();
        drop(state);

        let shared = Arc::clone(&self.shared);
        let count = shared.refresh_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(refresh = count, "Starting credential refresh");

        tokio::spawn(async move {
            let result = shared.exchange_tokens(refresh_token, api_key).await;

            let outcome = {
                let mut state = shared.state.lock();
                state.inflight = None;
                match result.and_then(|grant| state.apply(&grant, Utc::now())) {
                    Ok(()) => {
                        info!(expires_at = ?state.expires_at, "Access credential refreshed");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Credential refresh failed");
                        Err(e)
                    }
                }
            };

            tx.send_replace(Some(outcome));
        });

        Gate::Wait(rx)
    }

    async fn wait(&self, gate: Gate, cancel: &CancellationToken) -> Result<()> {
        let rx = match gate {
            Gate::Fresh => return Ok(()),
            Gate::Wait(rx) => rx,
        };

        let outcome = tokio::select! {
            outcome = await_outcome(rx.clone()) => outcome,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };

        match outcome {
            Some(result) => result,
            None => {
                // The refresh task died without reporting; unblock later callers
                let mut state = self.shared.state.lock();
                if state
                    .inflight
                    .as_ref()
                    .is_some_and(|current| current.same_channel(&rx))
                {
                    state.inflight = None;
                }
                Err(ClientError::NoCredentials(
                    "credential refresh was abandoned".into(),
                ))
            }
        }
    }
}

async fn await_outcome(mut rx: OutcomeReceiver) -> Option<RefreshOutcome> {
    rx.wait_for(|outcome| outcome.is_some())
        .await
        .ok()
        .and_then(|outcome| outcome.clone())
}

impl std::fmt::Debug for CredentialRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CredentialRefresher")
            .field("has_access_token", &state.access_token.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("has_api_key", &state.api_key.is_some())
            .field("expires_at", &state.expires_at)
            .field("refreshing", &state.inflight.is_some())
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}
