use albumlist_worker_task_handler::{IntoTaskHandlerResult, TaskHandler};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{normalize_tags, settle};
use crate::errors::TaskError;
use crate::services::{Album, Destination, OutgoingMessage, SearchMatch, UrlCheck};
use crate::WorkerContext;

async fn require_album(ctx: &WorkerContext, album_id: &str) -> Result<Album, TaskError> {
    ctx.call(ctx.services().store().album(album_id))
        .await?
        .ok_or_else(|| TaskError::NotFound(format!("no album record for {album_id}")))
}

/// Fetches title, artist and canonical URL for a freshly admitted album.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessDetails {
    pub album_id: String,
    /// Channel the album was posted in, empty when unknown
    #[serde(default)]
    pub channel: Option<String>,
    /// Records the channel but posts nothing to it and skips attribution
    #[serde(default)]
    pub silent: bool,
}

impl ProcessDetails {
    async fn process(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let services = ctx.services();
        let channel = self.channel.as_deref().filter(|c| !c.is_empty());
        let notify = channel
            .filter(|_| !self.silent && services.chat().has_token())
            .map(|c| Destination::Channel(c.to_string()));

        let metadata = ctx
            .call(services.scraper().fetch_metadata(&self.album_id))
            .await?;

        if let Err(e) = ctx
            .call(services.store().record_album(
                &self.album_id,
                &metadata,
                channel.unwrap_or_default(),
            ))
            .await
        {
            error!(album_id = %self.album_id, error = %e, "Failed to add album details");
            ctx.respond(
                notify.as_ref(),
                OutgoingMessage::text(":red_circle: failed to add album details"),
            )
            .await;
            return Err(e);
        }

        ctx.add_job(ProcessCover {
            album_id: self.album_id.clone(),
        })
        .await?;
        ctx.add_job(ProcessTags {
            album_id: self.album_id.clone(),
            tags: None,
        })
        .await?;

        info!(album_id = %self.album_id, "Processed album details");

        if !self.silent && services.chat().has_token() {
            ctx.respond(
                notify.as_ref(),
                OutgoingMessage::text(format!(
                    ":full_moon_with_face: processed album details for \"*{}*\" by *{}*",
                    metadata.title, metadata.artist
                )),
            )
            .await;
            ctx.add_job(AttributeUrl {
                album_id: self.album_id.clone(),
            })
            .await?;
        }

        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ProcessDetails {
    const IDENTIFIER: &'static str = "process-details";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.process(&ctx).await)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessCover {
    pub album_id: String,
}

impl ProcessCover {
    async fn process(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let album = require_album(ctx, &self.album_id).await?;
        let services = ctx.services();

        let cover = match ctx.call(services.scraper().fetch_cover_url(&album.url)).await {
            Ok(cover) => cover,
            Err(e) if e.is_quiet() => {
                info!(album_id = %self.album_id, reason = %e, "No album art found");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        ctx.call(services.store().set_cover(&self.album_id, &cover))
            .await?;
        info!(album_id = %self.album_id, "Processed cover");
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ProcessCover {
    const IDENTIFIER: &'static str = "process-cover";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.process(&ctx).await)
    }
}

/// Records tags on an album.
///
/// Without an explicit list the tags are scraped from the album page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessTags {
    pub album_id: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl ProcessTags {
    async fn process(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let services = ctx.services();

        let raw = match &self.tags {
            Some(tags) => tags.clone(),
            None => {
                let album = require_album(ctx, &self.album_id).await?;
                ctx.call(services.scraper().fetch_tags(&album.url)).await?
            }
        };

        let tags = normalize_tags(&raw);
        if tags.is_empty() {
            return Ok(());
        }

        ctx.call(services.store().record_tags(&self.album_id, &tags))
            .await?;
        info!(album_id = %self.album_id, tags = ?tags, "Tagged album");
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ProcessTags {
    const IDENTIFIER: &'static str = "process-tags";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.process(&ctx).await)
    }
}

fn default_check_for_new_url() -> bool {
    true
}

/// Verifies an album link still resolves and keeps `available` in sync.
///
/// A dead link first triggers a metadata lookup: when the album moved, the
/// new URL is stored and checked once more without another lookup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CheckUrl {
    pub album_id: String,
    #[serde(default = "default_check_for_new_url")]
    pub check_for_new_url: bool,
}

impl CheckUrl {
    pub fn new(album_id: impl Into<String>) -> Self {
        CheckUrl {
            album_id: album_id.into(),
            check_for_new_url: true,
        }
    }

    async fn check(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let album = require_album(ctx, &self.album_id).await?;
        let services = ctx.services();

        match ctx.call(services.scraper().url_available(&album.url)).await? {
            UrlCheck::Available => {
                if !album.available {
                    info!(album_id = %self.album_id, name = %album.name, artist = %album.artist, "Album is now available");
                    ctx.call(services.store().set_availability(&self.album_id, true))
                        .await?;
                }
            }
            UrlCheck::Gone => {
                if self.check_for_new_url && self.try_alternate_url(ctx, &album).await? {
                    return Ok(());
                }
                if album.available {
                    info!(album_id = %self.album_id, name = %album.name, artist = %album.artist, "Album is no longer available");
                    ctx.call(services.store().set_availability(&self.album_id, false))
                        .await?;
                }
            }
            UrlCheck::Inconclusive => {}
        }

        info!(album_id = %self.album_id, "Checked availability");
        Ok(())
    }

    /// Returns `true` when the album moved and a re-check was queued.
    async fn try_alternate_url(&self, ctx: &WorkerContext, album: &Album) -> Result<bool, TaskError> {
        let services = ctx.services();

        let metadata = match ctx.call(services.scraper().fetch_metadata(&self.album_id)).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_quiet() => {
                info!(album_id = %self.album_id, "No alternative URL found");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if metadata.canonical_url == album.url {
            return Ok(false);
        }

        info!(
            album_id = %self.album_id,
            url = %metadata.canonical_url,
            "Alternative album URL found"
        );
        if let Err(e) = ctx
            .call(services.store().set_album_url(&self.album_id, &metadata.canonical_url))
            .await
        {
            error!(album_id = %self.album_id, error = %e, "Failed to update album URL");
            return Ok(false);
        }

        ctx.add_job(CheckUrl {
            album_id: self.album_id.clone(),
            check_for_new_url: false,
        })
        .await?;
        Ok(true)
    }
}

impl TaskHandler<WorkerContext> for CheckUrl {
    const IDENTIFIER: &'static str = "check-url";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.check(&ctx).await)
    }
}

/// The user credited for a search hit on `url`.
pub(crate) fn attributed_user(hit: &SearchMatch, url: &str) -> Option<String> {
    if let Some(user) = hit.user.as_ref().filter(|u| !u.is_empty()) {
        return Some(user.clone());
    }
    [&hit.previous, &hit.previous2]
        .into_iter()
        .flatten()
        .find(|message| message.text.contains(url))
        .and_then(|message| message.user.clone())
}

/// Credits the users who posted an album's link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttributeUrl {
    pub album_id: String,
}

impl AttributeUrl {
    async fn attribute(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let album = require_album(ctx, &self.album_id).await?;
        let services = ctx.services();

        let hits = ctx.call(services.chat().search_messages(&album.url)).await?;
        for hit in &hits {
            let Some(user) = attributed_user(hit, &album.url) else {
                continue;
            };
            match ctx
                .call(services.store().add_user_to_album(&self.album_id, &user))
                .await
            {
                Ok(()) => info!(album_id = %self.album_id, user = %user, "Attributed album"),
                Err(e) => warn!(album_id = %self.album_id, user = %user, error = %e, "Failed to attribute user"),
            }
        }
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for AttributeUrl {
    const IDENTIFIER: &'static str = "attribute-url";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.attribute(&ctx).await)
    }
}
