use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use albumlist_worker_broker::{
    Broker, BrokerError, JobQueue, MemoryResultStore, RedisBroker, RedisResultStore, ResultStore,
};
use albumlist_worker_shutdown_signal::{from_future, shutdown_signal};
use albumlist_worker_task_handler::{run_task_from_args, TaskHandler};
use futures::FutureExt;
use rand::RngCore;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::producer::JobProducer;
use crate::runner::{RegisteredTask, Sweep};
use crate::services::Services;
use crate::{Worker, WorkerContext};

pub const DEFAULT_QUEUE_NAME: &str = "deferred_queue";
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(500);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for a [`Worker`].
///
/// ```no_run
/// # use albumlist_worker::{Services, WorkerOptions};
/// # async fn example(services: Services) -> Result<(), Box<dyn std::error::Error>> {
/// let worker = WorkerOptions::default()
///     .redis_url("redis://127.0.0.1/")
///     .services(services)
///     .define_albumlist_jobs()
///     .init()
///     .await?;
///
/// worker.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct WorkerOptions {
    /// Number of loops popping from the queue
    concurrency: Option<usize>,

    /// Name of the broker list
    queue_name: Option<String>,

    /// Used for the broker and the result store when they are not given
    redis_url: Option<String>,

    broker: Option<Arc<dyn Broker>>,

    result_store: Option<Arc<dyn ResultStore>>,

    /// How long published results live
    result_ttl: Option<Duration>,

    /// Bound on each collaborator call made by tasks
    call_timeout: Option<Duration>,

    services: Option<Services>,

    /// Map of task identifiers to handler functions
    jobs: HashMap<String, RegisteredTask>,

    /// Jobs pushed periodically while the worker runs
    sweeps: Vec<Sweep>,

    /// Whether SIGINT/SIGTERM/SIGHUP stop the worker
    listen_os_shutdown_signals: Option<bool>,
}

#[derive(Error, Debug)]
pub enum WorkerBuildError {
    #[error("Missing broker configuration - must provide either redis_url or broker")]
    MissingBroker,

    #[error("Missing services - tasks need a store, a scraper, a chat transport and a cache")]
    MissingServices,

    #[error("Failed to connect to the broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("Sweep refers to task '{0}' which is not defined on this worker")]
    UnknownSweepTask(String),
}

impl WorkerOptions {
    /// Builds the worker.
    ///
    /// Broker and result store default to Redis at `redis_url`. Without a
    /// `redis_url`, an explicit broker is required and results are kept in
    /// process memory.
    pub async fn init(self) -> Result<Worker, WorkerBuildError> {
        let broker: Arc<dyn Broker> = match (self.broker, &self.redis_url) {
            (Some(broker), _) => broker,
            (None, Some(url)) => Arc::new(RedisBroker::from_url(url)?),
            (None, None) => return Err(WorkerBuildError::MissingBroker),
        };

        let result_store: Arc<dyn ResultStore> = match (self.result_store, &self.redis_url) {
            (Some(store), _) => store,
            (None, Some(url)) => Arc::new(RedisResultStore::from_url(url)?),
            (None, None) => Arc::new(MemoryResultStore::new()),
        };

        let services = self.services.ok_or(WorkerBuildError::MissingServices)?;

        for sweep in &self.sweeps {
            if !self.jobs.contains_key(*sweep.identifier()) {
                return Err(WorkerBuildError::UnknownSweepTask(
                    sweep.identifier().to_string(),
                ));
            }
        }

        let queue_name = self
            .queue_name
            .unwrap_or_else(|| String::from(DEFAULT_QUEUE_NAME));
        let queue = JobQueue::new(broker, queue_name);
        let producer = JobProducer::new(queue.clone(), self.jobs.keys().cloned());

        let shutdown_token = CancellationToken::new();
        let requested = shutdown_token.clone().cancelled_owned();
        let signal = if self.listen_os_shutdown_signals.unwrap_or(true) {
            let os_signal = shutdown_signal();
            from_future(async move {
                tokio::select! {
                    _ = os_signal => {},
                    _ = requested => {},
                }
            })
        } else {
            from_future(requested)
        };

        let mut random_bytes = [0u8; 9];
        rand::rng().fill_bytes(&mut random_bytes);

        Ok(Worker {
            worker_id: format!("albumlist_worker_{}", hex::encode(random_bytes)),
            concurrency: self.concurrency.unwrap_or(1),
            queue,
            producer,
            result_store,
            result_ttl: self.result_ttl.unwrap_or(DEFAULT_RESULT_TTL),
            call_timeout: self.call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT),
            services,
            jobs: Arc::new(self.jobs),
            sweeps: self.sweeps,
            shutdown_signal: signal,
            shutdown_token,
        })
    }

    /// Sets how many jobs run at the same time. Defaults to 1, which runs
    /// jobs one after the other in pop order.
    ///
    /// # Panics
    /// Panics if the value is 0.
    pub fn concurrency(mut self, value: usize) -> Self {
        assert!(value > 0, "Concurrency must be greater than 0");
        self.concurrency = Some(value);
        self
    }

    /// Sets the broker list name. Defaults to `deferred_queue`.
    pub fn queue_name(mut self, value: &str) -> Self {
        self.queue_name = Some(value.into());
        self
    }

    pub fn redis_url(mut self, value: &str) -> Self {
        self.redis_url = Some(value.into());
        self
    }

    pub fn broker(mut self, value: Arc<dyn Broker>) -> Self {
        self.broker = Some(value);
        self
    }

    pub fn result_store(mut self, value: Arc<dyn ResultStore>) -> Self {
        self.result_store = Some(value);
        self
    }

    /// Sets how long published results stay readable. Defaults to 500 seconds.
    pub fn result_ttl(mut self, value: Duration) -> Self {
        self.result_ttl = Some(value);
        self
    }

    /// Sets the bound on each collaborator call. Defaults to 30 seconds.
    pub fn call_timeout(mut self, value: Duration) -> Self {
        self.call_timeout = Some(value);
        self
    }

    pub fn services(mut self, value: Services) -> Self {
        self.services = Some(value);
        self
    }

    pub fn listen_os_shutdown_signals(mut self, value: bool) -> Self {
        self.listen_os_shutdown_signals = Some(value);
        self
    }

    /// Registers the handler for `T`.
    pub fn define_job<T: TaskHandler<WorkerContext>>(mut self) -> Self {
        let identifier = T::IDENTIFIER;

        let worker_fn = move |ctx: WorkerContext, args: serde_json::Value| {
            run_task_from_args::<T, WorkerContext>(args, ctx).boxed()
        };

        self.jobs.insert(
            identifier.to_string(),
            RegisteredTask {
                run: Box::new(worker_fn),
                publish_result: T::PUBLISH_RESULT,
            },
        );
        self
    }

    /// Registers every task of the album list pipeline.
    pub fn define_albumlist_jobs(self) -> Self {
        crate::tasks::define_all(self)
    }

    /// Pushes `payload` every `every` while the worker runs. The first push
    /// happens one full interval after start.
    pub fn sweep<T: TaskHandler<WorkerContext>>(
        mut self,
        payload: T,
        every: Duration,
    ) -> Result<Self, serde_json::Error> {
        let args = serde_json::to_value(payload)?;
        self.sweeps.push(Sweep::new(T::IDENTIFIER, args, every));
        Ok(self)
    }
}
