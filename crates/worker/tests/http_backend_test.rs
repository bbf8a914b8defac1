//! HTTP queue backend against a mock queue service

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jobline_client::{ErrorKind, RetryPolicy};
use jobline_worker::backend::{ClaimRequest, WorkerLoad, WorkerRegistration};
use jobline_worker::prelude::*;

async fn backend(server: &MockServer) -> HttpQueueBackend {
    let config = ClientConfig::new(server.uri())
        .with_retry_policy(
            RetryPolicy::exponential()
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .with_jitter(false),
        )
        .with_circuit_breaker(None);
    HttpQueueBackend::from_config(&config).unwrap()
}

fn claim_request() -> ClaimRequest {
    ClaimRequest {
        worker_id: "w-1".to_string(),
        queue: "emails".to_string(),
        limit: 2,
        lease_duration_secs: 30,
    }
}

#[tokio::test]
async fn test_register_worker_posts_registration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workers"))
        .and(body_partial_json(json!({
            "name": "mailer",
            "queue": "emails",
            "concurrency": 4,
            "lease_duration_secs": 30,
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "worker_id": "w-1",
            "lease_duration_secs": 60,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registered = backend(&server)
        .await
        .register_worker(&WorkerRegistration {
            name: "mailer".to_string(),
            queue: "emails".to_string(),
            concurrency: 4,
            lease_duration_secs: 30,
            version: None,
        })
        .await
        .unwrap();

    assert_eq!(registered.worker_id, "w-1");
    assert_eq!(
        registered.lease_duration(Duration::from_secs(30)),
        Duration::from_secs(60)
    );
}

#[tokio::test]
async fn test_claim_parses_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queues/emails/claim"))
        .and(body_partial_json(json!({"worker_id": "w-1", "limit": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [
                {
                    "id": "job-1",
                    "queue": "emails",
                    "type": "send_email",
                    "payload": {"to": "a@example.com"},
                    "attempt": 2,
                    "max_attempts": 5,
                    "lease_expires_at": "2026-01-01T00:00:30Z",
                },
                {
                    "id": "job-2",
                    "queue": "emails",
                    "type": "send_email",
                    "payload": {"to": "b@example.com"},
                },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let jobs = backend(&server)
        .await
        .claim_jobs(&claim_request())
        .await
        .unwrap();

    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, "job-1");
    assert_eq!(jobs[0].job_type, "send_email");
    assert_eq!(jobs[0].attempt, 2);
    assert_eq!(jobs[0].max_attempts, Some(5));
    assert!(jobs[0].lease_expires_at.is_some());
    assert_eq!(jobs[1].attempt, 1);
    assert_eq!(jobs[1].payload["to"], "b@example.com");
}

#[tokio::test]
async fn test_claim_with_no_content_returns_no_jobs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queues/emails/claim"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let jobs = backend(&server)
        .await
        .claim_jobs(&claim_request())
        .await
        .unwrap();

    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_claim_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queues/emails/claim"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server)
        .await
        .claim_jobs(&claim_request())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
}

#[tokio::test]
async fn test_renew_lease_reads_cancel_flag_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/heartbeat"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/heartbeat"))
        .and(body_json(json!({"worker_id": "w-1", "lease_duration_secs": 30})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lease_expires_at": "2026-01-01T00:01:00Z",
            "cancel_requested": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let renewal = backend(&server)
        .await
        .renew_lease("w-1", "job-1", Duration::from_secs(30))
        .await
        .unwrap();

    assert!(renewal.cancel_requested);
    assert!(renewal.lease_expires_at.is_some());
}

#[tokio::test]
async fn test_sub_second_lease_renews_for_at_least_one_second() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/heartbeat"))
        .and(body_json(json!({"worker_id": "w-1", "lease_duration_secs": 1})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let renewal = backend(&server)
        .await
        .renew_lease("w-1", "job-1", Duration::from_millis(200))
        .await
        .unwrap();

    assert!(!renewal.cancel_requested);
}

#[tokio::test]
async fn test_ids_are_escaped_as_single_path_segments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queues/team%2Femails/claim"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/batch%2F7%3Fx%23y/complete"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/workers/w%201"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server).await;
    let mut request = claim_request();
    request.queue = "team/emails".to_string();
    assert!(backend.claim_jobs(&request).await.unwrap().is_empty());
    backend
        .complete_job("w-1", "batch/7?x#y", &json!(null))
        .await
        .unwrap();
    backend.deregister_worker("w 1").await.unwrap();
}

#[tokio::test]
async fn test_renew_lease_on_lost_job_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/heartbeat"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "lease_expired",
            "message": "job is not leased",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server)
        .await
        .renew_lease("w-1", "job-1", Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_job_outcomes_post_worker_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/progress"))
        .and(body_json(json!({
            "worker_id": "w-1",
            "progress": {"percent": 40.0, "message": "rendering"},
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/complete"))
        .and(body_json(json!({"worker_id": "w-1", "result": {"sent": true}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-2/fail"))
        .and(body_partial_json(json!({
            "worker_id": "w-1",
            "error": {"message": "bounced", "error_type": "smtp", "retryable": true},
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server).await;
    backend
        .update_progress(
            "w-1",
            "job-1",
            &JobProgress::percent(40.0).with_message("rendering"),
        )
        .await
        .unwrap();
    backend
        .complete_job("w-1", "job-1", &json!({"sent": true}))
        .await
        .unwrap();
    backend
        .fail_job(
            "w-1",
            "job-2",
            &JobFailure::from(JobError::retryable("bounced").with_type("smtp")),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worker_heartbeat_and_deregister() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workers/w-1/heartbeat"))
        .and(body_json(json!({
            "active_jobs": 2,
            "concurrency": 4,
            "accepting": true,
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/workers/w-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/workers/w-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server).await;
    backend
        .worker_heartbeat(
            "w-1",
            &WorkerLoad {
                active_jobs: 2,
                concurrency: 4,
                accepting: true,
            },
        )
        .await
        .unwrap();
    backend.deregister_worker("w-1").await.unwrap();
}

#[tokio::test]
async fn test_runtime_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workers"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"worker_id": "w-9"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/queues/default/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [{"id": "job-1", "queue": "default", "type": "echo", "payload": {"n": 1}}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/queues/default/claim"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/job-1/complete"))
        .and(body_json(json!({"worker_id": "w-9", "result": {"n": 1}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/workers/w-9/heartbeat"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/workers/w-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = WorkerRuntime::new(
        Arc::new(backend(&server).await),
        handler_fn(|ctx: JobContext| async move { Ok(ctx.payload().clone()) }),
        WorkerConfig::new("default").with_poll_interval(Duration::from_millis(10)),
    );
    runtime.start().await.unwrap();
    assert_eq!(runtime.worker_id().as_deref(), Some("w-9"));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while runtime.metrics().completed < 1 {
        assert!(std::time::Instant::now() < deadline, "job never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runtime.stop().await.unwrap();

    assert_eq!(runtime.state(), LifecycleState::Stopped);
}
