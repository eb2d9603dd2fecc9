use std::collections::HashSet;

use albumlist_worker_task_handler::{IntoTaskHandlerResult, TaskHandler};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{clean_source, extract_links, notice_target, settle, ProcessDetails, ProcessTags};
use crate::errors::TaskError;
use crate::services::{Destination, OutgoingMessage};
use crate::WorkerContext;

/// Reads a channel's history and queues a `consume` for every link pointing
/// at an album that is not tracked yet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScrapeChannel {
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl ScrapeChannel {
    fn label(&self) -> &str {
        self.channel_name.as_deref().unwrap_or(&self.channel_id)
    }

    async fn scrape(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let dest = self.destination.as_ref();
        let services = ctx.services();

        ctx.respond(
            dest,
            OutgoingMessage::text(format!("Getting channel history for {}...", self.label())),
        )
        .await;

        let messages = match ctx.call(services.chat().channel_history(&self.channel_id)).await {
            Ok(messages) => messages,
            Err(e) => {
                ctx.respond(
                    dest,
                    OutgoingMessage::text(format!(
                        "failed to get channel history for {}",
                        self.label()
                    )),
                )
                .await;
                return Err(e);
            }
        };

        ctx.respond(dest, OutgoingMessage::text(format!("Scraping {}...", self.label())))
            .await;

        let tracked = match ctx.call(services.store().all_tracked_ids()).await {
            Ok(tracked) => tracked,
            Err(e) => {
                ctx.respond(dest, OutgoingMessage::text("failed to update list"))
                    .await;
                return Err(e);
            }
        };

        let mut seen_links = HashSet::new();
        let mut seen_ids = HashSet::new();
        let mut queued = 0usize;
        let links: Vec<String> = messages
            .iter()
            .flat_map(|message| {
                message
                    .attachment_urls
                    .iter()
                    .map(|url| clean_source(url))
                    .chain(extract_links(&message.text))
            })
            .collect();

        for link in links {
            if !seen_links.insert(link.clone()) {
                continue;
            }

            let ids = match ctx.call(services.scraper().find_candidate_ids(&link)).await {
                Ok(ids) => ids,
                Err(e) if e.is_quiet() => continue,
                Err(e) => {
                    warn!(link = %link, error = %e, "Skipping link");
                    continue;
                }
            };

            let fresh = ids
                .into_iter()
                .filter(|id| !tracked.contains(id))
                .any(|id| seen_ids.insert(id));
            if !fresh {
                continue;
            }

            // Backfills stay quiet in the channel being scraped
            ctx.add_job(Consume {
                source: link,
                destination: None,
                channel: Some(self.channel_id.clone()),
                tags: Vec::new(),
                silent: true,
            })
            .await?;
            queued += 1;
        }

        info!(channel = %self.channel_id, queued, "Scraped channel");
        ctx.respond(
            dest,
            OutgoingMessage::text(format!(
                "Finished checking for new albums: {queued} found in {}",
                self.label()
            )),
        )
        .await;

        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ScrapeChannel {
    const IDENTIFIER: &'static str = "scrape-channel";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.scrape(&ctx).await)
    }
}

/// Admits the album behind a posted link into the list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Consume {
    /// The posted URL, or text containing it
    pub source: String,
    #[serde(default)]
    pub destination: Option<Destination>,
    /// Channel the link was posted in
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Posts no notices and asks the details stage to post none either
    #[serde(default)]
    pub silent: bool,
}

impl Consume {
    pub fn new(source: impl Into<String>) -> Self {
        Consume {
            source: source.into(),
            destination: None,
            channel: None,
            tags: Vec::new(),
            silent: false,
        }
    }

    async fn consume(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let services = ctx.services();
        let source = clean_source(&self.source);
        let target = if self.silent {
            None
        } else {
            notice_target(
                &self.destination,
                &self.channel,
                services.chat().has_token(),
            )
        };
        let target = target.as_ref();

        let ids = ctx.call(services.scraper().find_candidate_ids(&source)).await?;
        let Some(album_id) = ids.into_iter().next() else {
            return Err(TaskError::NotFound(format!("no album id at {source}")));
        };

        let tracked = ctx.call(services.store().list_contains(&album_id)).await?;
        let admitted = if tracked {
            false
        } else {
            match ctx.call(services.store().list_add(&album_id)).await {
                Ok(admitted) => admitted,
                Err(e) => {
                    error!(album_id = %album_id, error = %e, "Failed to update list");
                    ctx.respond(target, OutgoingMessage::text(":red_circle: failed to update list"))
                        .await;
                    return Err(e);
                }
            }
        };

        if admitted {
            info!(album_id = %album_id, "Added album to list");
            ctx.respond(
                target,
                OutgoingMessage::text(format!(":full_moon: added album to list: {source}"))
                    .unfurled(),
            )
            .await;
            ctx.add_job(ProcessDetails {
                album_id: album_id.clone(),
                channel: self.channel.clone(),
                silent: self.silent,
            })
            .await?;
        } else {
            info!(album_id = %album_id, "Album already in list");
            ctx.respond(
                target,
                OutgoingMessage::text(format!(":new_moon: album already in list: {source}"))
                    .unfurled(),
            )
            .await;
        }

        if !self.tags.is_empty() {
            ctx.add_job(ProcessTags {
                album_id,
                tags: Some(self.tags.clone()),
            })
            .await?;
        }

        Ok(())
    }
}

impl TaskHandler<WorkerContext> for Consume {
    const IDENTIFIER: &'static str = "consume";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.consume(&ctx).await)
    }
}

/// Admits every album listed on an artist page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConsumeArtist {
    pub artist_url: String,
    #[serde(default)]
    pub destination: Option<Destination>,
}

impl ConsumeArtist {
    async fn consume(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let services = ctx.services();
        let dest = self.destination.as_ref();
        let artist_url = clean_source(&self.artist_url);

        let album_ids = match ctx
            .call(services.scraper().find_artist_album_ids(&artist_url))
            .await
        {
            Ok(ids) => ids,
            Err(e) if e.is_quiet() => {
                info!(artist_url = %artist_url, "No albums found for artist");
                ctx.respond(dest, OutgoingMessage::text(":red_circle: failed to find any albums"))
                    .await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let tracked = ctx.call(services.store().all_tracked_ids()).await?;
        let mut seen = HashSet::new();
        let new_ids: Vec<String> = album_ids
            .into_iter()
            .filter(|id| !tracked.contains(id) && seen.insert(id.clone()))
            .collect();

        if new_ids.is_empty() {
            ctx.respond(dest, OutgoingMessage::text(":new_moon: found no new albums to process"))
                .await;
            return Ok(());
        }

        ctx.respond(
            dest,
            OutgoingMessage::text(format!(
                ":full_moon: found {} new albums to process...",
                new_ids.len()
            )),
        )
        .await;

        for album_id in new_ids {
            match ctx.call(services.store().list_add(&album_id)).await {
                Ok(true) => {
                    ctx.add_job(ProcessDetails {
                        album_id,
                        channel: None,
                        silent: false,
                    })
                    .await?;
                }
                Ok(false) => info!(album_id = %album_id, "Album already in list"),
                Err(e) => error!(album_id = %album_id, artist_url = %artist_url, error = %e, "Failed to update list"),
            }
        }

        ctx.respond(dest, OutgoingMessage::text(":full_moon_with_face: done processing artist albums"))
            .await;

        Ok(())
    }
}

impl TaskHandler<WorkerContext> for ConsumeArtist {
    const IDENTIFIER: &'static str = "consume-artist";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.consume(&ctx).await)
    }
}
