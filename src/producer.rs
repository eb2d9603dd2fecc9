use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use albumlist_worker_broker::{fetch_outcome, BrokerError, JobQueue, ResultStore};
use albumlist_worker_job::{DelayedResult, JobEnvelope, TaskOutcome};
use albumlist_worker_task_handler::TaskHandler;
use serde_json::Value;
use tracing::{debug, Span};

use crate::errors::{AlbumlistWorkerError, Result};
use crate::WorkerContext;

/// Enqueues jobs for registered tasks.
///
/// Used both by request-handling code and, through
/// [`WorkerContext::add_job`], by running tasks. Every call is exactly one
/// push to the broker and returns as soon as that push succeeded.
#[derive(Clone, Debug)]
pub struct JobProducer {
    queue: JobQueue,
    identifiers: Arc<BTreeSet<String>>,
}

impl JobProducer {
    /// Creates a producer that accepts only the given task identifiers.
    pub fn new<I, S>(queue: JobQueue, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JobProducer {
            queue,
            identifiers: Arc::new(identifiers.into_iter().map(Into::into).collect()),
        }
    }

    /// A producer for every task shipped with this crate.
    pub fn albumlist(queue: JobQueue) -> Self {
        Self::new(queue, crate::tasks::IDENTIFIERS.iter().copied())
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn is_registered(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    /// Enqueues `payload` for the task it belongs to.
    #[tracing::instrument(
        "add_job",
        skip_all,
        fields(task_id = tracing::field::Empty, result_key = tracing::field::Empty)
    )]
    pub async fn add_job<T: TaskHandler<WorkerContext>>(&self, payload: T) -> Result<DelayedResult> {
        let args = serde_json::to_value(payload)?;
        self.push(T::IDENTIFIER, args).await
    }

    /// Enqueues a job by identifier, with arguments that were built by hand.
    ///
    /// The arguments are only checked by the worker when the job runs.
    #[tracing::instrument(
        "add_raw_job",
        skip_all,
        fields(task_id = tracing::field::Empty, result_key = tracing::field::Empty)
    )]
    pub async fn add_raw_job(&self, identifier: &str, args: Value) -> Result<DelayedResult> {
        self.push(identifier, args).await
    }

    async fn push(&self, identifier: &str, args: Value) -> Result<DelayedResult> {
        if !self.is_registered(identifier) {
            return Err(AlbumlistWorkerError::UnknownTask(identifier.to_string()));
        }

        let envelope = JobEnvelope::new(self.queue.name(), identifier, args);

        let span = Span::current();
        span.record("task_id", identifier);
        span.record("result_key", envelope.result_key().as_str());

        self.queue.push(&envelope).await?;
        debug!(queue = self.queue.name(), "Job queued");

        Ok(envelope.delayed_result())
    }
}

/// Reading back what a queued job published.
pub trait DelayedResultExt {
    /// Returns the published outcome, or `None` if the job has not published
    /// one (yet, ever, or any more because it expired).
    fn fetch(
        &self,
        store: &dyn ResultStore,
    ) -> impl Future<Output = core::result::Result<Option<TaskOutcome>, BrokerError>> + Send;
}

impl DelayedResultExt for DelayedResult {
    async fn fetch(
        &self,
        store: &dyn ResultStore,
    ) -> core::result::Result<Option<TaskOutcome>, BrokerError> {
        fetch_outcome(store, self.key()).await
    }
}
