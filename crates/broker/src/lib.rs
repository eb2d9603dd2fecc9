//! Transport backends for the albumlist job queue.
//!
//! A [`Broker`] is a set of named FIFO lists holding encoded job envelopes and
//! a [`ResultStore`] is a key/value store whose entries expire. Both are
//! shared with other processes (producers in the web front end, other worker
//! instances) and are accessed without locking: the list semantics are the
//! only concurrency control.

mod memory;
mod queue;
mod redis_backend;

use std::fmt::Debug;
use std::time::Duration;

use albumlist_worker_job::EnvelopeError;
use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryBroker, MemoryResultStore};
pub use queue::{fetch_outcome, publish_outcome, JobQueue};
pub use redis_backend::{RedisBroker, RedisResultStore};

/// Errors raised by broker and result store backends.
///
/// Every variant is a transport-level failure: when a worker sees one while
/// popping, it cannot make progress and must stop.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The Redis server could not be reached or rejected a command
    #[error("Redis transport error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The broker was closed and will never yield another entry
    #[error("Broker is closed")]
    Closed,

    /// An envelope could not be encoded before being pushed
    #[error("{0}")]
    Envelope(#[from] EnvelopeError),

    /// A published outcome could not be encoded or decoded
    #[error("Failed to serialize task outcome: {0}")]
    Outcome(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, BrokerError>;

/// Ordered hand-off of encoded envelopes from producers to workers.
#[async_trait]
pub trait Broker: Send + Sync + Debug {
    /// Appends `payload` to the tail of `queue`. Never waits for a consumer.
    async fn push(&self, queue: &str, payload: String) -> Result<()>;

    /// Waits until `queue` has an entry, then removes and returns its head.
    async fn pop_blocking(&self, queue: &str) -> Result<String>;

    /// Removes and returns the head of `queue` if there is one.
    async fn try_pop(&self, queue: &str) -> Result<Option<String>>;

    /// Number of entries currently waiting in `queue`.
    async fn len(&self, queue: &str) -> Result<usize>;
}

/// Key/value store with per-entry expiry used to publish task return values.
#[async_trait]
pub trait ResultStore: Send + Sync + Debug {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Returns the value stored at `key` unless it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}
