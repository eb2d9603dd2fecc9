use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Error raised when an envelope cannot be encoded to or decoded from its wire form.
#[derive(Error, Debug)]
#[error("Malformed job envelope: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

/// `JobEnvelope` is the unit of queued work.
///
/// It is what producers push onto the broker list and what workers pop from
/// it. The task is referenced by its registered identifier, never by a
/// function, so producer and worker only need to agree on names and argument
/// shapes.
#[derive(Getters, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct JobEnvelope {
    /// Identifier of the registered task handler that should run this job
    task_id: String,
    /// JSON arguments of the task (the handler payload)
    args: Value,
    /// Key under which the worker publishes the outcome, if the task publishes one
    result_key: String,
    /// When the producer created this envelope
    enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates an envelope for `task_id` with a fresh result key scoped to `queue_name`.
    pub fn new(queue_name: &str, task_id: impl Into<String>, args: Value) -> Self {
        JobEnvelope {
            task_id: task_id.into(),
            args,
            result_key: result_key_for(queue_name),
            enqueued_at: Utc::now(),
        }
    }

    /// Serializes the envelope to the JSON string stored in the broker.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses an envelope previously produced by [`JobEnvelope::encode`].
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Returns a handle on the result this job may publish.
    pub fn delayed_result(&self) -> DelayedResult {
        DelayedResult {
            key: self.result_key.clone(),
        }
    }
}

/// Builds a globally unique result key: `<queue>:result:<uuid4>`.
pub fn result_key_for(queue_name: &str) -> String {
    format!("{queue_name}:result:{}", Uuid::new_v4())
}

/// Handle returned by the producer once a job has been queued.
///
/// Holding a `DelayedResult` does not mean the job ran, only that it was
/// pushed to the broker.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Hash)]
#[getset(get = "pub")]
pub struct DelayedResult {
    key: String,
}

impl DelayedResult {
    pub fn new(key: impl Into<String>) -> Self {
        DelayedResult { key: key.into() }
    }
}

/// Outcome published to the result store for tasks that declare their result publishable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Ok { value: Value },
    Error { error: String },
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskOutcome::Ok { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Ok { value } => Some(value),
            TaskOutcome::Error { .. } => None,
        }
    }
}
