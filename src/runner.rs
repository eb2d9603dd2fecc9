use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use albumlist_worker_broker::{publish_outcome, BrokerError, JobQueue, ResultStore};
use albumlist_worker_job::{JobEnvelope, TaskOutcome};
use albumlist_worker_shutdown_signal::ShutdownSignal;
use albumlist_worker_task_handler::RunTaskError;
use futures::try_join;
use getset::Getters;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::builder::WorkerOptions;
use crate::producer::JobProducer;
use crate::services::Services;
use crate::WorkerContext;

pub(crate) type WorkerFn = Box<
    dyn Fn(WorkerContext, Value) -> Pin<Box<dyn Future<Output = Result<Option<Value>, RunTaskError>> + Send>>
        + Send
        + Sync,
>;

pub(crate) struct RegisteredTask {
    pub(crate) run: WorkerFn,
    pub(crate) publish_result: bool,
}

/// A job pushed on a fixed interval while the worker runs.
#[derive(Getters, Debug, Clone)]
#[getset(get = "pub")]
pub struct Sweep {
    identifier: &'static str,
    args: Value,
    every: Duration,
}

impl Sweep {
    pub(crate) fn new(identifier: &'static str, args: Value, every: Duration) -> Self {
        Sweep {
            identifier,
            args,
            every,
        }
    }
}

/// Drains the queue and runs the registered tasks.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    pub(crate) worker_id: String,
    pub(crate) concurrency: usize,
    pub(crate) queue: JobQueue,
    #[getset(skip)]
    pub(crate) producer: JobProducer,
    pub(crate) result_store: Arc<dyn ResultStore>,
    pub(crate) result_ttl: Duration,
    pub(crate) call_timeout: Duration,
    pub(crate) services: Services,
    #[getset(skip)]
    pub(crate) jobs: Arc<HashMap<String, RegisteredTask>>,
    pub(crate) sweeps: Vec<Sweep>,
    pub(crate) shutdown_signal: ShutdownSignal,
    #[getset(skip)]
    pub(crate) shutdown_token: CancellationToken,
}

#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    /// The broker stopped answering; the worker cannot make progress
    #[error("Lost connection to the broker : '{0}'")]
    Broker(#[from] BrokerError),
}

impl Worker {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// Runs until shutdown is requested or the broker fails.
    ///
    /// A task failing or panicking never stops the worker. Jobs still running
    /// at shutdown get 5 seconds before they are aborted. An entry the broker
    /// hands over just as shutdown wins the race is dropped, so delivery is
    /// at most once.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        info!(
            worker_id = %self.worker_id,
            queue = self.queue.name(),
            concurrency = self.concurrency,
            "Worker started"
        );

        let result = try_join!(self.job_runner(), self.sweep_scheduler());

        match &result {
            Ok(_) => info!(worker_id = %self.worker_id, "Worker stopped"),
            Err(e) => error!(worker_id = %self.worker_id, error = %e, "Worker stopped on error"),
        }

        result?;
        Ok(())
    }

    /// Runs whatever is queued right now, including jobs those jobs enqueue,
    /// and returns once the queue is empty.
    pub async fn run_once(&self) -> Result<(), WorkerRuntimeError> {
        while let Some(envelope) = self.queue.try_pop().await? {
            self.process_envelope(envelope).await;
        }
        Ok(())
    }

    /// A producer accepting exactly the tasks defined on this worker.
    pub fn create_producer(&self) -> JobProducer {
        self.producer.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    async fn job_runner(&self) -> Result<(), WorkerRuntimeError> {
        let loops = (0..self.concurrency).map(|slot| self.job_loop(slot));
        futures::future::try_join_all(loops).await?;
        Ok(())
    }

    async fn job_loop(&self, slot: usize) -> Result<(), WorkerRuntimeError> {
        let mut shutdown_signal = self.shutdown_signal.clone();
        debug!(slot, "Waiting for jobs...");

        loop {
            let envelope = tokio::select! {
                biased;
                _ = &mut shutdown_signal => {
                    debug!(slot, "Job loop stopped");
                    return Ok(());
                }
                envelope = self.queue.pop() => envelope?,
            };

            self.process_envelope(envelope).await;
        }
    }

    async fn sweep_scheduler(&self) -> Result<(), WorkerRuntimeError> {
        if self.sweeps.is_empty() {
            return Ok(());
        }

        let schedulers = self.sweeps.iter().map(|sweep| self.run_sweep(sweep));
        futures::future::join_all(schedulers).await;
        Ok(())
    }

    async fn run_sweep(&self, sweep: &Sweep) {
        let start = tokio::time::Instant::now() + sweep.every;
        let mut interval = tokio::time::interval_at(start, sweep.every);
        let mut shutdown_signal = self.shutdown_signal.clone();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_signal => return,
                _ = interval.tick() => {},
            }

            match self
                .producer
                .add_raw_job(sweep.identifier, sweep.args.clone())
                .await
            {
                Ok(handle) => info!(
                    task_id = sweep.identifier,
                    result_key = handle.key().as_str(),
                    "Scheduled sweep"
                ),
                Err(e) => error!(task_id = sweep.identifier, error = %e, "Failed to schedule sweep"),
            }
        }
    }

    async fn process_envelope(&self, envelope: JobEnvelope) {
        let job_result = run_job(&envelope, self).await;
        release_job(job_result, &envelope, self).await;
    }
}

#[derive(Error, Debug)]
enum RunJobError {
    #[error("No task registered for identifier '{0}'")]
    FnNotFound(String),
    #[error("Task failed execution to complete : {0}")]
    TaskPanic(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Task(#[from] RunTaskError),
    #[error("Task was aborted by shutdown signal")]
    TaskAborted,
}

#[tracing::instrument(
    "run_job",
    skip(envelope, worker),
    fields(
        task_id = envelope.task_id().as_str(),
        result_key = envelope.result_key().as_str(),
        worker_id = worker.worker_id().as_str(),
    )
)]
async fn run_job(envelope: &JobEnvelope, worker: &Worker) -> Result<Option<Value>, RunJobError> {
    let task_id = envelope.task_id();

    let task = worker
        .jobs
        .get(task_id)
        .ok_or_else(|| RunJobError::FnNotFound(task_id.clone()))?;

    let latency = chrono::Utc::now().signed_duration_since(*envelope.enqueued_at());
    debug!(latency_ms = latency.num_milliseconds(), "Found task");

    let ctx = WorkerContext::new(
        task_id.clone(),
        envelope.result_key().clone(),
        worker.worker_id().clone(),
        worker.services().clone(),
        worker.call_timeout,
        worker.producer.clone(),
    );

    let task_fut = (task.run)(ctx, envelope.args().clone());

    let start = Instant::now();

    // Panics stay inside the spawned task and come back as a JoinError
    let job_task = tokio::spawn(task_fut.instrument(Span::current()));
    let abort_handle = job_task.abort_handle();

    let mut shutdown_signal = worker.shutdown_signal().clone();
    let shutdown_timeout = async {
        (&mut shutdown_signal).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    };

    let value = tokio::select! {
        res = job_task => {
            match res {
                Err(e) => Err(RunJobError::TaskPanic(e)),
                Ok(Err(e)) => Err(RunJobError::Task(e)),
                Ok(Ok(value)) => Ok(value),
            }
        }
        _ = shutdown_timeout => {
            abort_handle.abort();
            warn!("Job interrupted by shutdown signal after 5 seconds timeout");
            Err(RunJobError::TaskAborted)
        }
    }?;

    info!(
        duration = start.elapsed().as_millis(),
        "Completed task with success"
    );

    Ok(value)
}

/// Logs the outcome and publishes it when the task asks for it.
async fn release_job(
    job_result: Result<Option<Value>, RunJobError>,
    envelope: &JobEnvelope,
    worker: &Worker,
) {
    let publish_result = worker
        .jobs
        .get(envelope.task_id())
        .is_some_and(|task| task.publish_result);

    let outcome = match job_result {
        Ok(value) => value.map(|value| TaskOutcome::Ok { value }),
        Err(RunJobError::FnNotFound(task_id)) => {
            warn!(
                task_id = %task_id,
                args = %envelope.args(),
                "Dropping job for unknown task"
            );
            None
        }
        Err(e) => {
            warn!(
                error = %e,
                task_id = envelope.task_id().as_str(),
                args = %envelope.args(),
                result_key = envelope.result_key().as_str(),
                "Failed task"
            );
            Some(TaskOutcome::Error {
                error: e.to_string(),
            })
        }
    };

    let Some(outcome) = outcome.filter(|_| publish_result) else {
        return;
    };

    let key = envelope.result_key();
    match publish_outcome(
        worker.result_store.as_ref(),
        key,
        &outcome,
        worker.result_ttl,
    )
    .await
    {
        Ok(()) => debug!(result_key = key.as_str(), "Stored return value"),
        Err(e) => error!(result_key = key.as_str(), error = %e, "Failed to store return value"),
    }
}
