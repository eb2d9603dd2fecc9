//! Contracts for everything a task talks to outside the queue.
//!
//! Tasks never reach a database, a chat API or a web page directly: they go
//! through the traits below, bundled in [`Services`] and handed to every job
//! through its [`crate::WorkerContext`].

mod types;

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use getset::Getters;
use thiserror::Error;

pub use types::{
    Album, AlbumMetadata, ChannelMessage, Destination, OutgoingMessage, SearchMatch, UrlCheck,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Album store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Album store failed: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The page or id yielded nothing usable
    #[error("Nothing found at {0}")]
    NotFound(String),

    /// The page was found but did not have the expected shape
    #[error("Unexpected page content: {0}")]
    Malformed(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No chat token configured")]
    MissingToken,

    #[error("Chat API returned an error: {0}")]
    Api(String),

    #[error("Chat request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache transport error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// The shared album list and album details.
///
/// `list_*` methods operate on the tracked set of album ids, the rest on the
/// album records hanging off it.
#[async_trait]
pub trait AlbumStore: Send + Sync + Debug {
    async fn list_contains(&self, album_id: &str) -> Result<bool, StoreError>;

    /// Adds `album_id` to the tracked set. Returns `false` when it was already
    /// there, in which case nothing changed.
    async fn list_add(&self, album_id: &str) -> Result<bool, StoreError>;

    async fn all_tracked_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Inserts or refreshes the album record. An empty `channel` keeps the
    /// one already recorded.
    async fn record_album(
        &self,
        album_id: &str,
        metadata: &AlbumMetadata,
        channel: &str,
    ) -> Result<(), StoreError>;

    async fn record_tags(&self, album_id: &str, tags: &[String]) -> Result<(), StoreError>;

    async fn set_availability(&self, album_id: &str, available: bool) -> Result<(), StoreError>;

    async fn set_album_url(&self, album_id: &str, url: &str) -> Result<(), StoreError>;

    async fn set_cover(&self, album_id: &str, img: &str) -> Result<(), StoreError>;

    async fn set_added(&self, album_id: &str, added: DateTime<Utc>) -> Result<(), StoreError>;

    async fn album(&self, album_id: &str) -> Result<Option<Album>, StoreError>;

    async fn album_by_url(&self, url: &str) -> Result<Option<Album>, StoreError>;

    async fn albums(&self) -> Result<Vec<Album>, StoreError>;

    async fn albums_without_covers(&self) -> Result<Vec<Album>, StoreError>;

    /// Any album whose link still works, or `None` when there is none.
    async fn random_available_album(&self) -> Result<Option<Album>, StoreError>;

    /// Tracked ids that have no album record yet.
    async fn ids_without_details(&self) -> Result<Vec<String>, StoreError>;

    /// Removes the album from the tracked set and deletes its record.
    async fn delete_album(&self, album_id: &str) -> Result<(), StoreError>;

    async fn add_user_to_album(&self, album_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn remove_user_from_album(&self, album_id: &str, user_id: &str)
        -> Result<(), StoreError>;
}

#[async_trait]
pub trait Scraper: Send + Sync + Debug {
    /// Album ids referenced by `source`, which is either a URL or free text
    /// containing URLs.
    async fn find_candidate_ids(&self, source: &str) -> Result<Vec<String>, ScrapeError>;

    async fn fetch_metadata(&self, album_id: &str) -> Result<AlbumMetadata, ScrapeError>;

    async fn fetch_cover_url(&self, album_url: &str) -> Result<String, ScrapeError>;

    async fn fetch_tags(&self, album_url: &str) -> Result<Vec<String>, ScrapeError>;

    async fn find_artist_album_ids(&self, artist_url: &str) -> Result<Vec<String>, ScrapeError>;

    async fn url_available(&self, url: &str) -> Result<UrlCheck, ScrapeError>;

    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError>;
}

#[async_trait]
pub trait ChatTransport: Send + Sync + Debug {
    async fn post(&self, destination: &Destination, message: &OutgoingMessage)
        -> Result<(), ChatError>;

    async fn channel_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>, ChatError>;

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchMatch>, ChatError>;

    /// Whether channel posts and searches can be made at all.
    fn has_token(&self) -> bool;
}

#[async_trait]
pub trait Cache: Send + Sync + Debug {
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// Collaborators available to every running task.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct Services {
    store: Arc<dyn AlbumStore>,
    scraper: Arc<dyn Scraper>,
    chat: Arc<dyn ChatTransport>,
    cache: Arc<dyn Cache>,
}

impl Services {
    pub fn new(
        store: Arc<dyn AlbumStore>,
        scraper: Arc<dyn Scraper>,
        chat: Arc<dyn ChatTransport>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Services {
            store,
            scraper,
            chat,
            cache,
        }
    }
}
