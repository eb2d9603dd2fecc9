#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use albumlist_worker::services::{
    Album, AlbumMetadata, AlbumStore, Cache, CacheError, ChannelMessage, ChatError, ChatTransport,
    Destination, OutgoingMessage, ScrapeError, Scraper, SearchMatch, StoreError, UrlCheck,
};
use albumlist_worker::{
    Broker, BrokerError, JobEnvelope, MemoryBroker, MemoryResultStore, Services, Worker,
    WorkerOptions,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const QUEUE: &str = "deferred_queue";

pub fn enable_logs() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        // Log level set to debug except for sqlx set at warn (to not show all sql requests)
        let filter_layer = EnvFilter::try_new("debug,sqlx=warn").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

/// Broker that remembers every envelope pushed through it.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    inner: MemoryBroker,
    pushed: Mutex<Vec<JobEnvelope>>,
}

impl RecordingBroker {
    pub fn pushed(&self) -> Vec<JobEnvelope> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn pushed_task_ids(&self) -> Vec<String> {
        self.pushed()
            .iter()
            .map(|envelope| envelope.task_id().clone())
            .collect()
    }

    pub fn count(&self, task_id: &str) -> usize {
        self.pushed()
            .iter()
            .filter(|envelope| envelope.task_id() == task_id)
            .count()
    }

    pub async fn waiting(&self) -> Vec<String> {
        self.inner.snapshot(QUEUE).await
    }

    /// Makes every further broker call fail, as a lost connection would.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn push(&self, queue: &str, payload: String) -> Result<(), BrokerError> {
        if let Ok(envelope) = JobEnvelope::decode(&payload) {
            self.pushed.lock().unwrap().push(envelope);
        }
        self.inner.push(queue, payload).await
    }

    async fn pop_blocking(&self, queue: &str) -> Result<String, BrokerError> {
        self.inner.pop_blocking(queue).await
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>, BrokerError> {
        self.inner.try_pop(queue).await
    }

    async fn len(&self, queue: &str) -> Result<usize, BrokerError> {
        self.inner.len(queue).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAlbum {
    pub album_id: String,
    pub metadata: AlbumMetadata,
    pub channel: String,
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub list: Vec<String>,
    pub albums: HashMap<String, Album>,
    pub recorded: Vec<RecordedAlbum>,
    pub fail_record_album: bool,
}

#[derive(Debug, Default)]
pub struct FakeStore {
    pub state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn tracked(&self) -> Vec<String> {
        self.state.lock().unwrap().list.clone()
    }

    pub fn recorded(&self) -> Vec<RecordedAlbum> {
        self.state.lock().unwrap().recorded.clone()
    }

    pub fn album_now(&self, album_id: &str) -> Option<Album> {
        self.state.lock().unwrap().albums.get(album_id).cloned()
    }

    pub fn insert_album(&self, album: Album) {
        let mut state = self.state.lock().unwrap();
        if !state.list.contains(&album.album_id) {
            state.list.push(album.album_id.clone());
        }
        state.albums.insert(album.album_id.clone(), album);
    }

    fn update<F: FnOnce(&mut Album)>(&self, album_id: &str, f: F) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let album = state
            .albums
            .get_mut(album_id)
            .ok_or_else(|| StoreError::Backend(format!("no album {album_id}")))?;
        f(album);
        Ok(())
    }
}

pub fn album(album_id: &str, url: &str) -> Album {
    Album {
        album_id: album_id.to_string(),
        name: "T".to_string(),
        artist: "A".to_string(),
        url: url.to_string(),
        img: String::new(),
        channel: String::new(),
        available: true,
        added: Utc::now(),
        tags: Vec::new(),
        users: Vec::new(),
    }
}

#[async_trait]
impl AlbumStore for FakeStore {
    async fn list_contains(&self, album_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.lock().unwrap().list.iter().any(|id| id == album_id))
    }

    async fn list_add(&self, album_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.list.iter().any(|id| id == album_id) {
            return Ok(false);
        }
        state.list.push(album_id.to_string());
        Ok(true)
    }

    async fn all_tracked_ids(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.state.lock().unwrap().list.iter().cloned().collect())
    }

    async fn record_album(
        &self,
        album_id: &str,
        metadata: &AlbumMetadata,
        channel: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_record_album {
            return Err(StoreError::Backend("albums table is read only".into()));
        }
        state.recorded.push(RecordedAlbum {
            album_id: album_id.to_string(),
            metadata: metadata.clone(),
            channel: channel.to_string(),
        });
        let entry = state
            .albums
            .entry(album_id.to_string())
            .or_insert_with(|| album(album_id, &metadata.canonical_url));
        entry.name = metadata.title.clone();
        entry.artist = metadata.artist.clone();
        entry.url = metadata.canonical_url.clone();
        if !channel.is_empty() {
            entry.channel = channel.to_string();
        }
        Ok(())
    }

    async fn record_tags(&self, album_id: &str, tags: &[String]) -> Result<(), StoreError> {
        self.update(album_id, |album| {
            for tag in tags {
                if !album.tags.contains(tag) {
                    album.tags.push(tag.clone());
                }
            }
        })
    }

    async fn set_availability(&self, album_id: &str, available: bool) -> Result<(), StoreError> {
        self.update(album_id, |album| album.available = available)
    }

    async fn set_album_url(&self, album_id: &str, url: &str) -> Result<(), StoreError> {
        self.update(album_id, |album| album.url = url.to_string())
    }

    async fn set_cover(&self, album_id: &str, img: &str) -> Result<(), StoreError> {
        self.update(album_id, |album| album.img = img.to_string())
    }

    async fn set_added(&self, album_id: &str, added: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(album_id, |album| album.added = added)
    }

    async fn album(&self, album_id: &str) -> Result<Option<Album>, StoreError> {
        Ok(self.album_now(album_id))
    }

    async fn album_by_url(&self, url: &str) -> Result<Option<Album>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .albums
            .values()
            .find(|album| album.url == url)
            .cloned())
    }

    async fn albums(&self) -> Result<Vec<Album>, StoreError> {
        let mut albums: Vec<Album> = self.state.lock().unwrap().albums.values().cloned().collect();
        albums.sort_by(|a, b| a.album_id.cmp(&b.album_id));
        Ok(albums)
    }

    async fn albums_without_covers(&self) -> Result<Vec<Album>, StoreError> {
        let albums = self.albums().await?;
        Ok(albums.into_iter().filter(|album| album.img.is_empty()).collect())
    }

    // Lowest available id, so tests know which album comes back
    async fn random_available_album(&self) -> Result<Option<Album>, StoreError> {
        let albums = self.albums().await?;
        Ok(albums.into_iter().find(|album| album.available))
    }

    async fn ids_without_details(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .list
            .iter()
            .filter(|id| !state.albums.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn delete_album(&self, album_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.list.retain(|id| id != album_id);
        state.albums.remove(album_id);
        Ok(())
    }

    async fn add_user_to_album(&self, album_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.update(album_id, |album| {
            if !album.users.iter().any(|u| u == user_id) {
                album.users.push(user_id.to_string());
            }
        })
    }

    async fn remove_user_from_album(
        &self,
        album_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        self.update(album_id, |album| album.users.retain(|u| u != user_id))
    }
}

static ALBUM_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"album=(\d+)").unwrap());

/// Scraper answering from canned pages. URLs carrying `album=N` resolve to
/// `N` without any page.
#[derive(Debug, Default)]
pub struct FakeScraper {
    pub ids: Mutex<HashMap<String, Vec<String>>>,
    pub metadata: Mutex<HashMap<String, AlbumMetadata>>,
    pub covers: Mutex<HashMap<String, String>>,
    pub tags: Mutex<HashMap<String, Vec<String>>>,
    pub artist_albums: Mutex<HashMap<String, Vec<String>>>,
    pub statuses: Mutex<HashMap<String, u16>>,
    pub texts: Mutex<HashMap<String, String>>,
    /// URLs whose fetch never completes
    pub hanging: Mutex<HashSet<String>>,
}

impl FakeScraper {
    pub fn with_hanging_url(self, url: &str) -> Self {
        self.hanging.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn with_metadata(self, album_id: &str, title: &str, artist: &str, url: &str) -> Self {
        self.metadata.lock().unwrap().insert(
            album_id.to_string(),
            AlbumMetadata {
                title: title.to_string(),
                artist: artist.to_string(),
                canonical_url: url.to_string(),
            },
        );
        self
    }

    pub fn set_metadata_url(&self, album_id: &str, url: &str) {
        if let Some(metadata) = self.metadata.lock().unwrap().get_mut(album_id) {
            metadata.canonical_url = url.to_string();
        }
    }

    pub fn with_page_id(self, url: &str, album_id: &str) -> Self {
        self.ids
            .lock()
            .unwrap()
            .insert(url.to_string(), vec![album_id.to_string()]);
        self
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.statuses.lock().unwrap().insert(url.to_string(), status);
        self
    }

    pub fn with_text(self, url: &str, text: &str) -> Self {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), text.to_string());
        self
    }

    pub fn with_tags(self, url: &str, tags: &[&str]) -> Self {
        self.tags.lock().unwrap().insert(
            url.to_string(),
            tags.iter().map(|tag| tag.to_string()).collect(),
        );
        self
    }

    pub fn with_artist_albums(self, url: &str, ids: &[&str]) -> Self {
        self.artist_albums.lock().unwrap().insert(
            url.to_string(),
            ids.iter().map(|id| id.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn find_candidate_ids(&self, source: &str) -> Result<Vec<String>, ScrapeError> {
        if let Some(ids) = self.ids.lock().unwrap().get(source) {
            return Ok(ids.clone());
        }
        let ids: Vec<String> = ALBUM_PARAM
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect();
        if ids.is_empty() {
            return Err(ScrapeError::NotFound(source.to_string()));
        }
        Ok(ids)
    }

    async fn fetch_metadata(&self, album_id: &str) -> Result<AlbumMetadata, ScrapeError> {
        self.metadata
            .lock()
            .unwrap()
            .get(album_id)
            .cloned()
            .ok_or_else(|| ScrapeError::NotFound(album_id.to_string()))
    }

    async fn fetch_cover_url(&self, album_url: &str) -> Result<String, ScrapeError> {
        self.covers
            .lock()
            .unwrap()
            .get(album_url)
            .cloned()
            .ok_or_else(|| ScrapeError::NotFound(album_url.to_string()))
    }

    async fn fetch_tags(&self, album_url: &str) -> Result<Vec<String>, ScrapeError> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(album_url)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_artist_album_ids(&self, artist_url: &str) -> Result<Vec<String>, ScrapeError> {
        self.artist_albums
            .lock()
            .unwrap()
            .get(artist_url)
            .cloned()
            .ok_or_else(|| ScrapeError::NotFound(artist_url.to_string()))
    }

    async fn url_available(&self, url: &str) -> Result<UrlCheck, ScrapeError> {
        let status = self.statuses.lock().unwrap().get(url).copied().unwrap_or(200);
        Ok(UrlCheck::from_status(status))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        let hangs = self.hanging.lock().unwrap().contains(url);
        if hangs {
            std::future::pending::<()>().await;
        }
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ScrapeError::NotFound(url.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct FakeChat {
    pub token: bool,
    pub posts: Mutex<Vec<(Destination, OutgoingMessage)>>,
    pub history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    pub search: Mutex<HashMap<String, Vec<SearchMatch>>>,
}

impl FakeChat {
    pub fn with_token() -> Self {
        FakeChat {
            token: true,
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.text.clone())
            .collect()
    }

    pub fn posts_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|text| text.contains(needle)).count()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn post(
        &self,
        destination: &Destination,
        message: &OutgoingMessage,
    ) -> Result<(), ChatError> {
        if matches!(destination, Destination::Channel(_)) && !self.token {
            return Err(ChatError::MissingToken);
        }
        self.posts
            .lock()
            .unwrap()
            .push((destination.clone(), message.clone()));
        Ok(())
    }

    async fn channel_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>, ChatError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchMatch>, ChatError> {
        Ok(self
            .search
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    fn has_token(&self) -> bool {
        self.token
    }
}

#[derive(Debug, Default)]
pub struct FakeCache {
    pub deleted: Mutex<Vec<String>>,
    pub clears: Mutex<usize>,
}

#[async_trait]
impl Cache for FakeCache {
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        *self.clears.lock().unwrap() += 1;
        Ok(())
    }
}

/// Fakes for every collaborator, plus the broker and result store a worker
/// built from them uses.
pub struct TestWorld {
    pub broker: Arc<RecordingBroker>,
    pub results: Arc<MemoryResultStore>,
    pub store: Arc<FakeStore>,
    pub scraper: Arc<FakeScraper>,
    pub chat: Arc<FakeChat>,
    pub cache: Arc<FakeCache>,
}

impl TestWorld {
    pub fn new(scraper: FakeScraper, chat: FakeChat) -> Self {
        TestWorld {
            broker: Arc::new(RecordingBroker::default()),
            results: Arc::new(MemoryResultStore::new()),
            store: Arc::new(FakeStore::default()),
            scraper: Arc::new(scraper),
            chat: Arc::new(chat),
            cache: Arc::new(FakeCache::default()),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            self.store.clone(),
            self.scraper.clone(),
            self.chat.clone(),
            self.cache.clone(),
        )
    }

    /// Options with the album tasks defined, shutdown driven only by
    /// `request_shutdown`.
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions::default()
            .broker(self.broker.clone())
            .result_store(self.results.clone())
            .services(self.services())
            .listen_os_shutdown_signals(false)
            .define_albumlist_jobs()
    }

    pub async fn worker(&self) -> Worker {
        self.options()
            .init()
            .await
            .expect("Failed to create worker")
    }
}
