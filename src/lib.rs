//! Deferred task queue and album ingestion pipeline.
//!
//! Producers push [`JobEnvelope`]s onto a broker list and return right away.
//! A [`Worker`] pops them in order, runs the registered [`TaskHandler`] and,
//! for tasks that ask for it, publishes the outcome under the envelope's
//! result key for a limited time. Album tasks chain into one another along
//! the edges listed in [`pipeline::PIPELINE`].

mod bandcamp;
pub mod builder;
mod cache;
pub mod config;
mod context;
pub mod errors;
pub mod pipeline;
mod producer;
mod runner;
pub mod services;
mod slack;
mod store;
pub mod tasks;

pub use albumlist_worker_broker::{
    Broker, BrokerError, JobQueue, MemoryBroker, MemoryResultStore, RedisBroker, RedisResultStore,
    ResultStore,
};
pub use albumlist_worker_job::{DelayedResult, JobEnvelope, TaskOutcome};
pub use albumlist_worker_task_handler::{IntoTaskHandlerResult, Published, TaskHandler};

pub use bandcamp::BandcampScraper;
pub use builder::{WorkerBuildError, WorkerOptions};
pub use cache::RedisCache;
pub use config::{ConfigError, WorkerConfig};
pub use context::WorkerContext;
pub use producer::{DelayedResultExt, JobProducer};
pub use runner::{Sweep, Worker, WorkerRuntimeError};
pub use services::Services;
pub use slack::SlackChat;
pub use store::{escape_identifier, PgAlbumStore};
