use albumlist_worker_task_handler::{IntoTaskHandlerResult, Published, TaskHandler};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{settle, CheckUrl, ProcessCover, ProcessTags};
use crate::errors::TaskError;
use crate::services::AlbumMetadata;
use crate::WorkerContext;

/// One line of an album list export.
///
/// Columns: `id, added, album, artist, channel, img, tags, url`. `tags` holds
/// a list literal such as `['doom', 'sludge']`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExportRow {
    pub id: String,
    #[serde(default)]
    pub added: String,
    pub album: String,
    pub artist: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub img: String,
    #[serde(default)]
    pub tags: String,
    pub url: String,
}

impl From<ExportRow> for AddNewAlbumDetails {
    fn from(row: ExportRow) -> Self {
        AddNewAlbumDetails {
            added: parse_added(&row.added),
            tags: parse_tag_list(&row.tags),
            album_id: row.id,
            album: row.album,
            artist: row.artist,
            channel: row.channel,
            img: row.img,
            url: row.url,
        }
    }
}

/// Parses an export timestamp. Naive timestamps are taken as UTC.
pub(crate) fn parse_added(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(added) = DateTime::parse_from_rfc3339(raw) {
        return Some(added.with_timezone(&Utc));
    }
    if let Ok(added) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(added.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|added| added.and_utc())
}

/// Parses a tag list written either as JSON or as a single-quoted list
/// literal. An empty cell means "no tags recorded".
pub(crate) fn parse_tag_list(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(tags) = serde_json::from_str::<Vec<String>>(raw) {
        return Some(tags);
    }

    let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
    Some(
        inner
            .split(',')
            .map(|tag| tag.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|tag| !tag.is_empty())
            .collect(),
    )
}

/// Downloads an export and queues one `add-new-album-details` per row.
///
/// Publishes the number of rows queued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RestoreFromCsv {
    pub url: String,
}

impl RestoreFromCsv {
    async fn restore(&self, ctx: &WorkerContext) -> Result<usize, TaskError> {
        let text = ctx
            .call(ctx.services().scraper().fetch_text(&self.url))
            .await?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut queued = 0;
        for (line, row) in reader.deserialize::<ExportRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(url = %self.url, line = line + 2, error = %e, "Skipping unreadable row");
                    continue;
                }
            };
            ctx.add_job(AddNewAlbumDetails::from(row)).await?;
            queued += 1;
        }

        if queued == 0 {
            return Err(TaskError::Malformed(format!("no album rows in {}", self.url)));
        }

        info!(url = %self.url, queued, "Queued album restore");
        Ok(queued)
    }
}

impl TaskHandler<WorkerContext> for RestoreFromCsv {
    const IDENTIFIER: &'static str = "restore-from-csv";
    const PUBLISH_RESULT: bool = true;

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        self.restore(&ctx).await.map(Published)
    }
}

/// Restores a single album record from an export row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AddNewAlbumDetails {
    pub album_id: String,
    #[serde(default)]
    pub added: Option<DateTime<Utc>>,
    pub album: String,
    pub artist: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub img: String,
    /// `None` scrapes the tags again
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub url: String,
}

impl AddNewAlbumDetails {
    async fn add(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let result = self.record(ctx).await;
        if let Err(e) = &result {
            error!(
                album_id = %self.album_id,
                album = %self.album,
                artist = %self.artist,
                error = %e,
                "Failed to add new album details"
            );
        }
        result
    }

    async fn record(&self, ctx: &WorkerContext) -> Result<(), TaskError> {
        let store = ctx.services().store();

        if !ctx.call(store.list_contains(&self.album_id)).await? {
            ctx.call(store.list_add(&self.album_id)).await?;
        }

        let metadata = AlbumMetadata {
            title: self.album.clone(),
            artist: self.artist.clone(),
            canonical_url: self.url.clone(),
        };
        ctx.call(store.record_album(&self.album_id, &metadata, &self.channel))
            .await?;

        if let Some(added) = self.added {
            ctx.call(store.set_added(&self.album_id, added)).await?;
        }

        if self.img.is_empty() {
            ctx.add_job(ProcessCover {
                album_id: self.album_id.clone(),
            })
            .await?;
        } else {
            ctx.call(store.set_cover(&self.album_id, &self.img)).await?;
        }

        ctx.add_job(ProcessTags {
            album_id: self.album_id.clone(),
            tags: self.tags.clone(),
        })
        .await?;
        ctx.add_job(CheckUrl::new(self.album_id.clone())).await?;

        info!(album_id = %self.album_id, album = %self.album, artist = %self.artist, "Added new album details");
        Ok(())
    }
}

impl TaskHandler<WorkerContext> for AddNewAlbumDetails {
    const IDENTIFIER: &'static str = "add-new-album-details";

    async fn run(self, ctx: WorkerContext) -> impl IntoTaskHandlerResult {
        settle(&ctx, self.add(&ctx).await)
    }
}
