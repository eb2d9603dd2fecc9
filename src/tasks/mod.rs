//! The album list tasks.
//!
//! Each task is its own payload type. Successors are enqueued through
//! [`WorkerContext::add_job`] and must be declared in [`crate::pipeline`].

mod admin;
mod details;
mod featured;
mod ingest;
mod restore;
mod sweeps;

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::builder::WorkerOptions;
use crate::errors::TaskError;
use crate::services::Destination;
use crate::WorkerContext;

pub use admin::{AddUser, ClearCache, Delete, RemoveUser, MAX_ADD_USER_ATTEMPTS};
pub use details::{AttributeUrl, CheckUrl, ProcessCover, ProcessDetails, ProcessTags};
pub use featured::AlbumOfTheDay;
pub use ingest::{Consume, ConsumeArtist, ScrapeChannel};
pub use restore::{AddNewAlbumDetails, ExportRow, RestoreFromCsv};
pub use sweeps::{
    AttributeAllUrls, CheckAllUrls, ProcessAllCovers, ProcessAllDetails, ProcessAllTags,
};

/// Identifiers of every task in this module.
pub const IDENTIFIERS: &[&str] = &[
    "scrape-channel",
    "consume",
    "consume-artist",
    "process-details",
    "process-cover",
    "process-tags",
    "check-url",
    "attribute-url",
    "restore-from-csv",
    "add-new-album-details",
    "delete",
    "clear-cache",
    "add-user",
    "remove-user",
    "process-all-details",
    "process-all-covers",
    "process-all-tags",
    "check-all-urls",
    "attribute-all-urls",
    "album-of-the-day",
];

pub(crate) fn define_all(options: WorkerOptions) -> WorkerOptions {
    options
        .define_job::<ScrapeChannel>()
        .define_job::<Consume>()
        .define_job::<ConsumeArtist>()
        .define_job::<ProcessDetails>()
        .define_job::<ProcessCover>()
        .define_job::<ProcessTags>()
        .define_job::<CheckUrl>()
        .define_job::<AttributeUrl>()
        .define_job::<RestoreFromCsv>()
        .define_job::<AddNewAlbumDetails>()
        .define_job::<Delete>()
        .define_job::<ClearCache>()
        .define_job::<AddUser>()
        .define_job::<RemoveUser>()
        .define_job::<ProcessAllDetails>()
        .define_job::<ProcessAllCovers>()
        .define_job::<ProcessAllTags>()
        .define_job::<CheckAllUrls>()
        .define_job::<AttributeAllUrls>()
        .define_job::<AlbumOfTheDay>()
}

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>|]+").expect("link pattern is a valid regex"));

/// URLs found in a chat message, in order of appearance.
pub(crate) fn extract_links(text: &str) -> Vec<String> {
    LINK.find_iter(text)
        .map(|m| clean_source(m.as_str()))
        .collect()
}

/// Strips chat markup around a posted link: `<https://a|label>` becomes
/// `https://a`.
pub(crate) fn clean_source(source: &str) -> String {
    let source = source.trim().trim_start_matches('<');
    let source = source.split('|').next().unwrap_or_default();
    source.trim_end_matches('>').replace('\\', "")
}

/// Lowercases tags, drops a leading `#` and empty or repeated entries.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|tag| {
            let tag = tag.trim();
            tag.strip_prefix('#').unwrap_or(tag).to_lowercase()
        })
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Where notices go: the explicit destination, otherwise the channel the
/// album was posted in when channel posts are possible at all.
pub(crate) fn notice_target(
    destination: &Option<Destination>,
    channel: &Option<String>,
    can_post_to_channel: bool,
) -> Option<Destination> {
    destination.clone().or_else(|| {
        channel
            .as_ref()
            .filter(|c| can_post_to_channel && !c.is_empty())
            .map(|c| Destination::Channel(c.clone()))
    })
}

/// Turns "nothing to do" errors into success.
pub(crate) fn settle(ctx: &WorkerContext, result: Result<(), TaskError>) -> Result<(), TaskError> {
    match result {
        Err(e) if e.is_quiet() => {
            debug!(task_id = %ctx.task_id(), reason = %e, "Stopping branch");
            Ok(())
        }
        other => other,
    }
}
