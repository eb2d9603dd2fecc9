//! The scheduled album of the day.

use albumlist_worker_task_handler::{IntoTaskHandlerResult, Published, TaskHandler};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::TaskError;
use crate::services::{Destination, OutgoingMessage};
use crate::WorkerContext;

/// Posts one random available album to `channel` and publishes its id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlbumOfTheDay {
    pub channel: String,
}

impl AlbumOfTheDay {
    async fn pick(&self, ctx: &WorkerContext) -> Result<Published<Option<String>>, TaskError> {
        let Some(album) = ctx
            .call(ctx.services().store().random_available_album())
            .await?
        else {
            info!(task_id = %ctx.task_id(), "No available album to feature");
            return Ok(Published(None));
        };

        info!(
            task_id = %ctx.task_id(),
            album_id = %album.album_id,
            channel = %self.channel,
            "Featuring album"
        );
        let text = format!(
            ":new_moon_with_face: Today's album of the day is: {}",
            album.url
        );
        ctx.respond(
            Some(&Destination::Channel(self.channel.clone())),
            OutgoingMessage::text(text).unfurled(),
        )
        .await;
        Ok(Published(Some(album.album_id)))
    }
}

impl TaskHandler<WorkerContext> for AlbumOfTheDay {
    const IDENTIFIER: &'static str = "album-of-the-day";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        self.pick(&ctx).await
    }
}
