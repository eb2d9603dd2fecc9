use albumlist_worker_task_handler::{IntoTaskHandlerResult, TaskHandler};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{clean_source, settle, Consume};
use crate::errors::TaskError;
use crate::services::{Destination, OutgoingMessage};
use crate::WorkerContext;

/// How many times `add-user` looks for an album it had to queue for
/// admission before giving up.
pub const MAX_ADD_USER_ATTEMPTS: u32 = 3;

async fn forget(ctx: &WorkerContext, key: &str) {
    if let Err(e) = ctx.call(ctx.services().cache().delete(key)).await {
        warn!(key, error = %e, "Failed to invalidate cache entry");
    }
}

/// Removes an album from the list along with its details.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Delete {
    pub album_id: String,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl Delete {
    async fn delete(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let dest = self.destination.as_ref();

        if let Err(e) = ctx
            .call(ctx.services().store().delete_album(&self.album_id))
            .await
        {
            error!(album_id = %self.album_id, error = %e, "Failed to delete album details");
            ctx.respond(
                dest,
                OutgoingMessage::text(format!("failed to delete album details for {}", self.album_id)),
            )
            .await;
            return Err(e);
        }

        forget(ctx, &format!("alb-{}", self.album_id)).await;
        info!(album_id = %self.album_id, "Deleted album details");
        ctx.respond(
            dest,
            OutgoingMessage::text(format!("Removed album from list: {}", self.album_id)),
        )
        .await;
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for Delete {
    const IDENTIFIER: &'static str = "delete";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.delete(&ctx).await)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ClearCache {
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl ClearCache {
    async fn clear(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        ctx.call(ctx.services().cache().clear()).await?;
        info!("Cache cleared");
        ctx.respond(self.destination.as_ref(), OutgoingMessage::text("Cache cleared"))
            .await;
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ClearCache {
    const IDENTIFIER: &'static str = "clear-cache";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.clear(&ctx).await)
    }
}

fn first_attempt() -> u32 {
    1
}

/// Adds an album to a user's personal list.
///
/// An album that is not known yet is queued for admission first, and the
/// lookup is retried behind it up to [`MAX_ADD_USER_ATTEMPTS`] times.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AddUser {
    pub album_url: String,
    pub user_id: String,
    #[serde(default)]
    pub destination: Option<Destination>,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

impl AddUser {
    pub fn new(album_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        AddUser {
            album_url: album_url.into(),
            user_id: user_id.into(),
            destination: None,
            attempt: first_attempt(),
        }
    }

    async fn add(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let store = ctx.services().store();
        let dest = self.destination.as_ref();
        let album_url = clean_source(&self.album_url);
        let failure = OutgoingMessage::text("failed to add album to user's list");

        let album = match ctx.call(store.album_by_url(&album_url)).await {
            Ok(album) => album,
            Err(e) => {
                error!(user_id = %self.user_id, error = %e, "Failed to add user to album");
                ctx.respond(dest, failure).await;
                return Err(e);
            }
        };

        let Some(album) = album else {
            return self.retry_later(ctx, album_url).await;
        };

        if let Err(e) = ctx
            .call(store.add_user_to_album(&album.album_id, &self.user_id))
            .await
        {
            error!(user_id = %self.user_id, album_id = %album.album_id, error = %e, "Failed to add user to album");
            ctx.respond(dest, failure).await;
            return Err(e);
        }

        forget(ctx, &format!("u-{}", self.user_id)).await;
        info!(user_id = %self.user_id, album_id = %album.album_id, "Added user to album");
        ctx.respond(
            dest,
            OutgoingMessage::text("Added album to your list. Use `/my_albums` to see all..."),
        )
        .await;
        Ok(())
    }

    async fn retry_later(&self, ctx: &WorkerContext, album_url: String) -> Result<(), TaskError> {
        if self.attempt >= MAX_ADD_USER_ATTEMPTS {
            warn!(
                user_id = %self.user_id,
                album_url = %album_url,
                attempts = self.attempt,
                "Album never showed up, giving up"
            );
            ctx.respond(
                self.destination.as_ref(),
                OutgoingMessage::text("failed to add album to user's list"),
            )
            .await;
            return Ok(());
        }

        if self.attempt == first_attempt() {
            ctx.add_job(Consume {
                source: album_url.clone(),
                destination: self.destination.clone(),
                channel: None,
                tags: Vec::new(),
                silent: false,
            })
            .await?;
        }

        ctx.add_job(AddUser {
            album_url,
            user_id: self.user_id.clone(),
            destination: self.destination.clone(),
            attempt: self.attempt + 1,
        })
        .await?;
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for AddUser {
    const IDENTIFIER: &'static str = "add-user";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.add(&ctx).await)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoveUser {
    pub album_id: String,
    pub user_id: String,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl RemoveUser {
    async fn remove(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let dest = self.destination.as_ref();

        if let Err(e) = ctx
            .call(
                ctx.services()
                    .store()
                    .remove_user_from_album(&self.album_id, &self.user_id),
            )
            .await
        {
            error!(user_id = %self.user_id, album_id = %self.album_id, error = %e, "Failed to remove user from album");
            ctx.respond(dest, OutgoingMessage::text("failed to remove album from user's list"))
                .await;
            return Err(e);
        }

        forget(ctx, &format!("u-{}", self.user_id)).await;
        info!(user_id = %self.user_id, album_id = %self.album_id, "Removed user from album");
        ctx.respond(dest, OutgoingMessage::text("Removed album from your list."))
            .await;
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for RemoveUser {
    const IDENTIFIER: &'static str = "remove-user";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.remove(&ctx).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_user_starts_at_first_attempt() {
        let task: AddUser = serde_json::from_value(json!({
            "album_url": "https://a.bandcamp.com/album/t",
            "user_id": "U1",
        }))
        .unwrap();
        assert_eq!(task, AddUser::new("https://a.bandcamp.com/album/t", "U1"));
        assert_eq!(task.attempt, 1);
    }
}
