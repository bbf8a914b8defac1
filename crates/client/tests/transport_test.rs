//! Transport behaviour against a scripted in-process executor
//!
//! The scripted executor counts physical calls exactly, which the retry,
//! refresh and circuit-breaker properties are stated in terms of.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use jobline_client::prelude::*;

/// Replays scripted responses, then repeats the fallback forever
struct ScriptedExecutor {
    script: Mutex<VecDeque<Response>>,
    fallback: Response,
    calls: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedExecutor {
    fn new(script: Vec<u16>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().map(status).collect()),
            fallback: status(fallback),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        })
    }

    fn with_responses(script: Vec<Response>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: status(fallback),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _request: &Request,
        bearer: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(bearer.map(str::to_string));
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

fn status(code: u16) -> Response {
    Response {
        status: code,
        headers: HashMap::new(),
        body: Vec::new(),
    }
}

#[derive(Default)]
struct CountingExchange {
    refreshes: AtomicUsize,
}

#[async_trait]
impl CredentialExchange for CountingExchange {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, ClientError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            access_token: format!("fresh-{n}"),
            refresh_token: None,
            expires_in: Some(3600),
            expires_at: None,
        })
    }

    async fn login(&self, _api_key: &str) -> Result<TokenGrant, ClientError> {
        Err(ClientError::NoCredentials("login not expected".into()))
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::exponential()
        .with_max_retries(max_retries)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false)
}

fn refresher(
    exchange: Arc<CountingExchange>,
    expires_in: ChronoDuration,
) -> Arc<CredentialRefresher> {
    Arc::new(CredentialRefresher::new(
        Credentials::tokens(
            "initial",
            Some("refresh-token".into()),
            Some(Utc::now() + expires_in),
        ),
        exchange,
    ))
}

#[tokio::test]
async fn test_reactive_401_refreshes_once_and_succeeds() {
    let executor = ScriptedExecutor::new(vec![401], 200);
    let exchange = Arc::new(CountingExchange::default());
    let transport = Transport::new(executor.clone())
        .with_retry_policy(fast_retry(3))
        .with_credentials(refresher(exchange.clone(), ChronoDuration::hours(1)));

    let response = transport.execute(Request::get("/jobs/1")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(executor.calls(), 2);
    assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        *executor.tokens.lock(),
        vec![Some("initial".to_string()), Some("fresh-1".to_string())]
    );
}

#[tokio::test]
async fn test_repeated_401_is_bounded_by_auth_retries() {
    let executor = ScriptedExecutor::new(vec![401, 401], 200);
    let exchange = Arc::new(CountingExchange::default());
    let transport = Transport::new(executor.clone())
        .with_retry_policy(fast_retry(3))
        .with_credentials(refresher(exchange.clone(), ChronoDuration::hours(1)));

    let err = transport.execute(Request::get("/jobs/1")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(executor.calls(), 2);
    assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_proactive_refresh_before_first_call() {
    let executor = ScriptedExecutor::new(vec![], 200);
    let exchange = Arc::new(CountingExchange::default());
    let transport = Transport::new(executor.clone())
        .with_credentials(refresher(exchange.clone(), ChronoDuration::seconds(10)));

    transport.execute(Request::get("/jobs")).await.unwrap();

    assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(*executor.tokens.lock(), vec![Some("fresh-1".to_string())]);
}

#[tokio::test]
async fn test_non_idempotent_post_is_not_retried() {
    let executor = ScriptedExecutor::new(vec![], 500);
    let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(3));

    let err = transport
        .execute(Request::post("/jobs").with_body(serde_json::json!({"type": "email"})))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_idempotent_post_uses_every_retry() {
    let executor = ScriptedExecutor::new(vec![], 500);
    let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(3));

    let err = transport
        .execute(Request::post("/jobs").idempotent())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(executor.calls(), 4);
}

#[tokio::test]
async fn test_retries_until_success() {
    let executor = ScriptedExecutor::new(vec![503, 502], 200);
    let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(3));

    let response = transport.execute(Request::get("/jobs")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(executor.calls(), 3);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    for code in [400, 403, 404, 409, 413, 422] {
        let executor = ScriptedExecutor::new(vec![], code);
        let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(3));

        let err = transport.execute(Request::get("/jobs")).await.unwrap_err();

        assert_eq!(err.status(), Some(code));
        assert_eq!(executor.calls(), 1, "status {code} was retried");
    }
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut limited = status(429);
    limited.headers.insert("retry-after".into(), "0".into());
    let executor = ScriptedExecutor::with_responses(vec![limited], 200);
    let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(2));

    let response = transport.execute(Request::get("/jobs")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_retry_after_is_capped_at_max_delay() {
    let mut limited = status(429);
    limited.headers.insert("retry-after".into(), "86400".into());
    let executor = ScriptedExecutor::with_responses(vec![limited], 200);
    let transport = Transport::new(executor.clone()).with_retry_policy(fast_retry(2));

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        transport.execute(Request::get("/jobs")),
    )
    .await
    .expect("retry-after hint should be capped")
    .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_open_circuit_fails_fast() {
    let executor = ScriptedExecutor::new(vec![], 500);
    let transport = Transport::new(executor.clone())
        .with_retry_policy(fast_retry(0))
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_open_timeout(Duration::from_secs(60)),
        );

    for _ in 0..2 {
        let err = transport.execute(Request::get("/jobs")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
    }
    assert_eq!(
        transport.breaker_metrics().map(|m| m.state),
        Some(CircuitState::Open)
    );

    let err = transport.execute(Request::get("/jobs")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker() {
    let executor = ScriptedExecutor::new(vec![], 404);
    let transport = Transport::new(executor.clone())
        .with_circuit_breaker(CircuitBreakerConfig::new().with_failure_threshold(1));

    for _ in 0..3 {
        let err = transport.execute(Request::get("/jobs/x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    assert_eq!(
        transport.breaker_metrics().map(|m| m.state),
        Some(CircuitState::Closed)
    );
    assert_eq!(executor.calls(), 3);
}

#[tokio::test]
async fn test_half_open_probe_closes_circuit() {
    let executor = ScriptedExecutor::new(vec![500], 200);
    let transport = Transport::new(executor.clone())
        .with_retry_policy(fast_retry(0))
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(1)
                .with_open_timeout(Duration::from_millis(20)),
        );

    assert!(transport.execute(Request::get("/jobs")).await.is_err());
    tokio::time::sleep(Duration::from_millis(30)).await;

    transport.execute(Request::get("/jobs")).await.unwrap();
    assert_eq!(
        transport.breaker_metrics().map(|m| m.state),
        Some(CircuitState::Closed)
    );
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let executor = ScriptedExecutor::new(vec![], 503);
    let transport = Transport::new(executor.clone()).with_retry_policy(
        RetryPolicy::fixed(Duration::from_secs(30), 5),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = transport
        .execute_with_cancel(Request::get("/jobs"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let executor = ScriptedExecutor::new(vec![], 200);
    let exchange = Arc::new(CountingExchange::default());
    let refresher = refresher(exchange.clone(), ChronoDuration::hours(1));

    // Every request carrying the initial token is rejected
    struct RejectInitial {
        inner: Arc<ScriptedExecutor>,
    }

    #[async_trait]
    impl HttpExecutor for RejectInitial {
        async fn execute(
            &self,
            request: &Request,
            bearer: Option<&str>,
        ) -> Result<Response, ClientError> {
            if bearer == Some("initial") {
                self.inner.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                return Ok(status(401));
            }
            self.inner.execute(request, bearer).await
        }
    }

    let transport = Arc::new(
        Transport::new(Arc::new(RejectInitial {
            inner: executor.clone(),
        }))
        .with_credentials(refresher),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let transport = Arc::clone(&transport);
        handles.push(tokio::spawn(async move {
            transport.execute(Request::get("/jobs")).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, 200);
    }

    assert_eq!(exchange.refreshes.load(Ordering::SeqCst), 1);
}
