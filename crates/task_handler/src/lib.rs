use std::fmt::Display;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// A task that can be queued and executed by a worker.
///
/// The implementing type is the task's argument payload: it is serialized
/// into the job envelope by producers and deserialized again by the worker
/// before [`TaskHandler::run`] is called. `IDENTIFIER` is the stable name the
/// envelope carries, so it must never change once jobs have been queued with
/// it.
///
/// `Ctx` is whatever the worker hands to running tasks (collaborators, a way
/// to enqueue follow-up jobs, ...).
pub trait TaskHandler<Ctx>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifier stored in job envelopes for this task
    const IDENTIFIER: &'static str;

    /// Whether the worker should publish this task's outcome to the result store
    const PUBLISH_RESULT: bool = false;

    fn run(self, ctx: Ctx) -> impl Future<Output = impl IntoTaskHandlerResult> + Send;
}

/// Wraps a task's return value to mark it as a result worth publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct Published<T>(pub T);

/// Conversion from what a task returns to what the worker records.
///
/// `Ok(None)` means the task succeeded with nothing to publish.
pub trait IntoTaskHandlerResult {
    fn into_task_handler_result(self) -> Result<Option<Value>, String>;
}

impl IntoTaskHandlerResult for () {
    fn into_task_handler_result(self) -> Result<Option<Value>, String> {
        Ok(None)
    }
}

impl<E: Display> IntoTaskHandlerResult for Result<(), E> {
    fn into_task_handler_result(self) -> Result<Option<Value>, String> {
        self.map(|_| None).map_err(|e| e.to_string())
    }
}

impl<T: Serialize, E: Display> IntoTaskHandlerResult for Result<Published<T>, E> {
    fn into_task_handler_result(self) -> Result<Option<Value>, String> {
        let Published(value) = self.map_err(|e| e.to_string())?;
        match serde_json::to_value(value) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(format!("Failed to serialize task result: {e}")),
        }
    }
}

/// Why running a task from its envelope arguments failed.
#[derive(Error, Debug)]
pub enum RunTaskError {
    /// The envelope arguments do not match the task's payload shape
    #[error("Invalid arguments for task '{identifier}': {source}")]
    InvalidArgs {
        identifier: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The task ran and returned an error
    #[error("{0}")]
    TaskError(String),
}

/// Deserializes `args` into `T` and runs it with `ctx`.
pub async fn run_task_from_args<T, Ctx>(args: Value, ctx: Ctx) -> Result<Option<Value>, RunTaskError>
where
    T: TaskHandler<Ctx>,
{
    let task: T = serde_json::from_value(args).map_err(|source| RunTaskError::InvalidArgs {
        identifier: T::IDENTIFIER,
        source,
    })?;

    task.run(ctx)
        .await
        .into_task_handler_result()
        .map_err(RunTaskError::TaskError)
}
