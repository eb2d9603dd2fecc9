use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::services::{AlbumMetadata, ScrapeError, Scraper, UrlCheck};
use crate::tasks::extract_links;

pub const EMBEDDED_PLAYER_URL: &str = "https://bandcamp.com/EmbeddedPlayer/v=2/album=";

const PLAYER_DATA: &str = "var playerdata = ";

/// Patterns the album pages are read with.
#[derive(Debug, Clone)]
pub(crate) struct Patterns {
    album_param: Regex,
    album_comment: Regex,
    cover: Regex,
    tag: Regex,
    artist_item: Regex,
}

impl Patterns {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            album_param: Regex::new(r"album=(\d+)")?,
            album_comment: Regex::new(r"<!--\s*album id\s+(\d+)\s*-->")?,
            cover: Regex::new(r#"(?s)id="tralbumArt".*?<img[^>]*?\ssrc="([^"]+)""#)?,
            tag: Regex::new(r#"<a[^>]*class="tag"[^>]*>\s*([^<]*?)\s*</a>"#)?,
            artist_item: Regex::new(r#"data-item-id="album-(\d+)""#)?,
        })
    }

    /// Album id written in the URL itself, as embedded players do.
    pub(crate) fn id_in_url(&self, url: &str) -> Option<String> {
        self.album_param.captures(url).map(|c| c[1].to_string())
    }

    /// Album id from an album page.
    pub(crate) fn id_in_page(&self, html: &str) -> Option<String> {
        self.album_comment
            .captures(html)
            .or_else(|| self.album_param.captures(html))
            .map(|c| c[1].to_string())
    }

    pub(crate) fn cover(&self, html: &str) -> Option<String> {
        self.cover.captures(html).map(|c| c[1].to_string())
    }

    pub(crate) fn tags(&self, html: &str) -> Vec<String> {
        self.tag
            .captures_iter(html)
            .map(|c| c[1].to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }

    pub(crate) fn artist_album_ids(&self, html: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for c in self.artist_item.captures_iter(html) {
            if !ids.iter().any(|id| id == &c[1]) {
                ids.push(c[1].to_string());
            }
        }
        ids
    }
}

#[derive(Deserialize)]
struct PlayerData {
    album_title: String,
    artist: String,
    linkback: String,
}

/// Reads `var playerdata = {...};` out of an embedded player page.
pub(crate) fn parse_player_data(html: &str) -> Result<AlbumMetadata, ScrapeError> {
    let start = html
        .find(PLAYER_DATA)
        .ok_or_else(|| ScrapeError::NotFound("player data".into()))?
        + PLAYER_DATA.len();
    let line = html[start..].lines().next().unwrap_or_default();
    let json = line.trim().trim_end_matches(';');

    let data: PlayerData =
        serde_json::from_str(json).map_err(|e| ScrapeError::Malformed(format!("player data: {e}")))?;
    Ok(AlbumMetadata {
        title: data.album_title,
        artist: data.artist,
        canonical_url: data.linkback,
    })
}

fn artist_music_url(artist_url: &str) -> String {
    let artist_url = artist_url.trim_end_matches('/');
    if artist_url.ends_with("/music") {
        artist_url.to_string()
    } else {
        format!("{artist_url}/music")
    }
}

/// [`Scraper`] for Bandcamp album and artist pages.
#[derive(Debug, Clone)]
pub struct BandcampScraper {
    client: reqwest::Client,
    patterns: Patterns,
    player_url: String,
}

impl BandcampScraper {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let patterns = Patterns::new().map_err(|e| ScrapeError::Malformed(e.to_string()))?;
        Ok(Self {
            client,
            patterns,
            player_url: EMBEDDED_PLAYER_URL.to_string(),
        })
    }

    /// Replaces the embedded player prefix the album id is appended to.
    pub fn with_player_url(mut self, player_url: impl Into<String>) -> Self {
        self.player_url = player_url.into();
        self
    }

    async fn get_page(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            debug!(url, status = response.status().as_u16(), "Page not available");
            return Err(ScrapeError::NotFound(url.to_string()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Scraper for BandcampScraper {
    async fn find_candidate_ids(&self, source: &str) -> Result<Vec<String>, ScrapeError> {
        let links = extract_links(source);
        let bare_url = links.len() == 1 && source.trim().len() <= links[0].len() + 2;

        let mut ids: Vec<String> = Vec::new();
        for link in &links {
            let found = match self.patterns.id_in_url(link) {
                Some(id) => Some(id),
                None if bare_url || link.contains("bandcamp.com") => {
                    match self.get_page(link).await {
                        Ok(html) => self.patterns.id_in_page(&html),
                        Err(ScrapeError::NotFound(_)) => None,
                        Err(e) => return Err(e),
                    }
                }
                None => None,
            };
            trace!(link = %link, ?found, "Looked for album id");
            if let Some(id) = found.filter(|id| !ids.contains(id)) {
                ids.push(id);
            }
        }

        if ids.is_empty() {
            return Err(ScrapeError::NotFound(format!("album id in {source}")));
        }
        Ok(ids)
    }

    async fn fetch_metadata(&self, album_id: &str) -> Result<AlbumMetadata, ScrapeError> {
        let html = self
            .get_page(&format!("{}{album_id}", self.player_url))
            .await?;
        parse_player_data(&html)
    }

    async fn fetch_cover_url(&self, album_url: &str) -> Result<String, ScrapeError> {
        let html = self.get_page(album_url).await?;
        self.patterns
            .cover(&html)
            .ok_or_else(|| ScrapeError::NotFound(format!("album art at {album_url}")))
    }

    async fn fetch_tags(&self, album_url: &str) -> Result<Vec<String>, ScrapeError> {
        match self.get_page(album_url).await {
            Ok(html) => Ok(self.patterns.tags(&html)),
            Err(ScrapeError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn find_artist_album_ids(&self, artist_url: &str) -> Result<Vec<String>, ScrapeError> {
        let html = self.get_page(&artist_music_url(artist_url)).await?;
        let ids = self.patterns.artist_album_ids(&html);
        if ids.is_empty() {
            return Err(ScrapeError::NotFound(format!("albums at {artist_url}")));
        }
        Ok(ids)
    }

    async fn url_available(&self, url: &str) -> Result<UrlCheck, ScrapeError> {
        let response = self.client.head(url).send().await?;
        Ok(UrlCheck::from_status(response.status().as_u16()))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        self.get_page(url).await
    }
}
