//! Maintenance sweeps: each queues one per-album job for every album it
//! selects and publishes how many it queued.

use albumlist_worker_task_handler::{IntoTaskHandlerResult, Published, TaskHandler};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{AttributeUrl, CheckUrl, ProcessCover, ProcessDetails, ProcessTags};
use crate::errors::TaskError;
use crate::services::{Destination, OutgoingMessage};
use crate::WorkerContext;

/// Posts `started`, queues one job per id, then posts `done` or `failed`.
async fn sweep<T, F>(
    ctx: &WorkerContext,
    destination: Option<&Destination>,
    notices: [&str; 3],
    ids: impl std::future::Future<Output = Result<Vec<String>, TaskError>>,
    job: F,
) -> Result<Published<usize>, TaskError>
where
    T: TaskHandler<WorkerContext>,
    F: Fn(String) -> T,
{
    let [started, done, failed] = notices;
    ctx.respond(destination, OutgoingMessage::text(started)).await;

    let queued = async {
        let ids = ids.await?;
        let count = ids.len();
        for id in ids {
            ctx.add_job(job(id)).await?;
        }
        Ok::<_, TaskError>(count)
    }
    .await;

    match queued {
        Ok(count) => {
            info!(task_id = %ctx.task_id(), queued = count, "Sweep queued jobs");
            if !done.is_empty() {
                ctx.respond(destination, OutgoingMessage::text(done)).await;
            }
            Ok(Published(count))
        }
        Err(e) => {
            error!(task_id = %ctx.task_id(), error = %e, "Sweep failed");
            ctx.respond(destination, OutgoingMessage::text(failed)).await;
            Err(e)
        }
    }
}

async fn album_ids(ctx: &WorkerContext) -> Result<Vec<String>, TaskError> {
    let albums = ctx.call(ctx.services().store().albums()).await?;
    Ok(albums.into_iter().map(|album| album.album_id).collect())
}

async fn ids_without_details(ctx: &WorkerContext) -> Result<Vec<String>, TaskError> {
    ctx.call(ctx.services().store().ids_without_details()).await
}

async fn ids_without_covers(ctx: &WorkerContext) -> Result<Vec<String>, TaskError> {
    let albums = ctx
        .call(ctx.services().store().albums_without_covers())
        .await?;
    Ok(albums.into_iter().map(|album| album.album_id).collect())
}

/// Fetches details for tracked ids that have no album record yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ProcessAllDetails {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl TaskHandler<WorkerContext> for ProcessAllDetails {
    const IDENTIFIER: &'static str = "process-all-details";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        sweep(
            &ctx,
            self.destination.as_ref(),
            [
                "Process started...",
                "Processed all album details",
                "failed to process all album details...",
            ],
            ids_without_details(&ctx),
            |album_id| ProcessDetails {
                album_id,
                channel: None,
                silent: false,
            },
        )
        .await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ProcessAllCovers {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl TaskHandler<WorkerContext> for ProcessAllCovers {
    const IDENTIFIER: &'static str = "process-all-covers";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        sweep(
            &ctx,
            self.destination.as_ref(),
            [
                "Process started...",
                "Processed all album covers",
                "failed to process all album details...",
            ],
            ids_without_covers(&ctx),
            |album_id| ProcessCover { album_id },
        )
        .await
    }
}

/// Scrapes tags again for every album.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ProcessAllTags {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl TaskHandler<WorkerContext> for ProcessAllTags {
    const IDENTIFIER: &'static str = "process-all-tags";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        sweep(
            &ctx,
            self.destination.as_ref(),
            [
                "Process started...",
                "Processed all album tags",
                "failed to process all album details...",
            ],
            album_ids(&ctx),
            |album_id| ProcessTags {
                album_id,
                tags: None,
            },
        )
        .await
    }
}

/// Checks every album link. This is the sweep usually scheduled on the worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CheckAllUrls {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl TaskHandler<WorkerContext> for CheckAllUrls {
    const IDENTIFIER: &'static str = "check-all-urls";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        sweep(
            &ctx,
            self.destination.as_ref(),
            ["Check started...", "", "failed to check all album urls"],
            album_ids(&ctx),
            |album_id| CheckUrl::new(album_id),
        )
        .await
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AttributeAllUrls {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl TaskHandler<WorkerContext> for AttributeAllUrls {
    const IDENTIFIER: &'static str = "attribute-all-urls";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        sweep(
            &ctx,
            self.destination.as_ref(),
            ["Attribution started...", "", "failed to check all album urls"],
            album_ids(&ctx),
            |album_id| AttributeUrl { album_id },
        )
        .await
    }
}
