use std::future::Future;
use std::time::Duration;

use albumlist_worker_job::DelayedResult;
use albumlist_worker_task_handler::TaskHandler;
use getset::Getters;
use tracing::{debug, warn};

use crate::errors::{AlbumlistWorkerError, TaskError};
use crate::pipeline::is_declared_edge;
use crate::producer::JobProducer;
use crate::services::{Destination, OutgoingMessage, Services};

/// Everything a running task gets from the worker.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct WorkerContext {
    /// Identifier of the task being run
    task_id: String,
    /// Result key of the job being run
    result_key: String,
    worker_id: String,
    services: Services,
    /// Upper bound for every call made through [`WorkerContext::call`]
    call_timeout: Duration,
    #[getset(skip)]
    producer: JobProducer,
}

impl WorkerContext {
    pub(crate) fn new(
        task_id: String,
        result_key: String,
        worker_id: String,
        services: Services,
        call_timeout: Duration,
        producer: JobProducer,
    ) -> Self {
        WorkerContext {
            task_id,
            result_key,
            worker_id,
            services,
            call_timeout,
            producer,
        }
    }

    /// Enqueues a successor of the running task.
    ///
    /// Fails with [`AlbumlistWorkerError::UndeclaredEdge`] when the pipeline
    /// table does not list `T` as a successor of the running task.
    pub async fn add_job<T: TaskHandler<WorkerContext>>(
        &self,
        payload: T,
    ) -> Result<DelayedResult, AlbumlistWorkerError> {
        if !is_declared_edge(&self.task_id, T::IDENTIFIER) {
            return Err(AlbumlistWorkerError::UndeclaredEdge {
                from: self.task_id.clone(),
                to: T::IDENTIFIER.to_string(),
            });
        }
        self.producer.add_job(payload).await
    }

    /// Awaits a collaborator call, giving up after `call_timeout`.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, TaskError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<TaskError>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(TaskError::Timeout(self.call_timeout)),
        }
    }

    /// Best-effort notice to whoever triggered the task.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn respond(&self, destination: Option<&Destination>, message: OutgoingMessage) {
        let Some(destination) = destination else {
            return;
        };

        let chat = self.services.chat();
        match self.call(chat.post(destination, &message)).await {
            Ok(()) => debug!(task_id = %self.task_id, ?destination, "Posted notice"),
            Err(e) => warn!(
                task_id = %self.task_id,
                ?destination,
                error = %e,
                text = %message.text,
                "Failed to post notice"
            ),
        }
    }
}
