use std::time::Duration;

use albumlist_worker_broker::BrokerError;
use thiserror::Error;

use crate::services::{CacheError, ChatError, ScrapeError, StoreError};

/// Errors raised when enqueuing jobs.
#[derive(Error, Debug)]
pub enum AlbumlistWorkerError {
    /// The broker could not be reached or rejected the push
    #[error("Error occured while pushing job: {0}")]
    Broker(#[from] BrokerError),

    /// The job arguments could not be serialized
    #[error("Error while serializing params: {0}")]
    JsonSerializeError(#[from] serde_json::Error),

    /// No handler is registered under this identifier
    #[error("Unknown task identifier '{0}'")]
    UnknownTask(String),

    /// A running task tried to enqueue a successor it does not declare
    #[error("Task '{from}' is not allowed to enqueue '{to}'")]
    UndeclaredEdge { from: String, to: String },
}

pub type Result<T> = core::result::Result<T, AlbumlistWorkerError>;

/// What can go wrong inside a task body.
///
/// `NotFound` and `Malformed` end the current branch quietly, anything else
/// makes the task report a failure.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Collaborator call did not finish within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Chat(#[from] ChatError),

    #[error("Scrape failed: {0}")]
    Scrape(String),

    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("Failed to enqueue follow-up job: {0}")]
    Enqueue(#[from] AlbumlistWorkerError),
}

impl From<ScrapeError> for TaskError {
    fn from(e: ScrapeError) -> Self {
        match e {
            ScrapeError::NotFound(what) => TaskError::NotFound(what),
            ScrapeError::Malformed(what) => TaskError::Malformed(what),
            ScrapeError::Http(e) => TaskError::Scrape(e.to_string()),
        }
    }
}

impl TaskError {
    /// Whether this error only means "nothing to do here".
    pub fn is_quiet(&self) -> bool {
        matches!(self, TaskError::NotFound(_) | TaskError::Malformed(_))
    }
}
