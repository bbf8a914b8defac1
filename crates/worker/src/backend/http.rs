//! Queue backend over the job-lifecycle HTTP endpoints

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobline_client::{encode_path, ClientConfig, Request, Result, Transport};
use serde::Deserialize;
use serde_json::json;

use super::{
    ClaimRequest, Job, JobFailure, JobProgress, LeaseRenewal, QueueBackend, RegisteredWorker,
    WorkerLoad, WorkerRegistration,
};

/// [`QueueBackend`] backed by the resilient [`Transport`]
///
/// Endpoints:
///
/// | Operation          | Request                          | Retried |
/// |--------------------|----------------------------------|---------|
/// | register worker    | `POST /workers`                  | no      |
/// | claim jobs         | `POST /queues/{queue}/claim`     | no      |
/// | renew lease        | `POST /jobs/{id}/heartbeat`      | yes     |
/// | update progress    | `POST /jobs/{id}/progress`       | yes     |
/// | complete job       | `POST /jobs/{id}/complete`       | yes     |
/// | fail job           | `POST /jobs/{id}/fail`           | yes     |
/// | worker heartbeat   | `POST /workers/{id}/heartbeat`   | yes     |
/// | deregister worker  | `DELETE /workers/{id}`           | yes     |
///
/// Claims are never retried: a claim whose response was lost may already
/// have leased jobs, and re-issuing it would lease more. Queue names and
/// IDs are percent-encoded as single path segments.
#[derive(Debug, Clone)]
pub struct HttpQueueBackend {
    transport: Arc<Transport>,
}

#[derive(Deserialize)]
struct ClaimResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

impl HttpQueueBackend {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Build the transport stack from client configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(Transport::from_config(config)?)))
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

#[async_trait]
impl QueueBackend for HttpQueueBackend {
    async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<RegisteredWorker> {
        self.transport
            .execute_json(Request::post("/workers").json(registration)?)
            .await
    }

    async fn claim_jobs(&self, request: &ClaimRequest) -> Result<Vec<Job>> {
        let path = encode_path(["queues", request.queue.as_str(), "claim"])?;
        let response = self
            .transport
            .execute(Request::post(path).json(request)?)
            .await?;

        if response.body.is_empty() {
            return Ok(Vec::new());
        }
        Ok(response.json::<ClaimResponse>()?.jobs)
    }

    async fn renew_lease(
        &self,
        worker_id: &str,
        job_id: &str,
        lease: Duration,
    ) -> Result<LeaseRenewal> {
        let request = Request::post(encode_path(["jobs", job_id, "heartbeat"])?)
            .with_body(json!({
                "worker_id": worker_id,
                "lease_duration_secs": lease.as_secs().max(1),
            }))
            .idempotent();
        let response = self.transport.execute(request).await?;

        if response.body.is_empty() {
            return Ok(LeaseRenewal::default());
        }
        response.json()
    }

    async fn update_progress(
        &self,
        worker_id: &str,
        job_id: &str,
        progress: &JobProgress,
    ) -> Result<()> {
        let request = Request::post(encode_path(["jobs", job_id, "progress"])?)
            .with_body(json!({ "worker_id": worker_id, "progress": progress }))
            .idempotent();
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        worker_id: &str,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let request = Request::post(encode_path(["jobs", job_id, "complete"])?)
            .with_body(json!({ "worker_id": worker_id, "result": result }))
            .idempotent();
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn fail_job(&self, worker_id: &str, job_id: &str, failure: &JobFailure) -> Result<()> {
        let request = Request::post(encode_path(["jobs", job_id, "fail"])?)
            .with_body(json!({ "worker_id": worker_id, "error": failure }))
            .idempotent();
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn worker_heartbeat(&self, worker_id: &str, load: &WorkerLoad) -> Result<()> {
        let request = Request::post(encode_path(["workers", worker_id, "heartbeat"])?)
            .json(load)?
            .idempotent();
        self.transport.execute(request).await?;
        Ok(())
    }

    async fn deregister_worker(&self, worker_id: &str) -> Result<()> {
        self.transport
            .execute(Request::delete(encode_path(["workers", worker_id])?).idempotent())
            .await?;
        Ok(())
    }
}
