//! Job handler trait

use std::future::Future;

use async_trait::async_trait;

use super::JobContext;
use crate::error::JobError;

/// Result of handling one job
pub type JobResult = Result<serde_json::Value, JobError>;

/// User-supplied job logic
///
/// The runtime reports `Ok(value)` as the job's result and `Err(error)`
/// as its failure. Panics are caught and reported as non-retryable
/// failures. Handlers should watch [`JobContext::cancelled`] and return
/// promptly once it fires.
///
/// # Example
///
/// ```ignore
/// struct SendEmail;
///
/// #[async_trait]
/// impl JobHandler for SendEmail {
///     async fn handle(&self, ctx: JobContext) -> JobResult {
///         let input: EmailInput = ctx.payload_as()?;
///         ctx.report_progress(JobProgress::percent(50.0)).await?;
///         Ok(json!({"message_id": send(input).await?}))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext) -> JobResult;
}

/// [`JobHandler`] wrapping an async closure, see [`handler_fn`]
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

/// Build a [`JobHandler`] from an async function or closure
///
/// ```ignore
/// let handler = handler_fn(|ctx: JobContext| async move {
///     Ok(ctx.payload().clone())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> JobResult {
        (self.f)(ctx).await
    }
}
