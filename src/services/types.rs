use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// What the scraper knows about an album id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AlbumMetadata {
    pub title: String,
    pub artist: String,
    pub canonical_url: String,
}

/// An album record as the store returns it.
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Album {
    #[sqlx(rename = "id")]
    pub album_id: String,
    pub name: String,
    pub artist: String,
    pub url: String,
    pub img: String,
    pub channel: String,
    pub available: bool,
    pub added: DateTime<Utc>,
    pub tags: Vec<String>,
    pub users: Vec<String>,
}

/// Where a notice about a task should be sent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Destination {
    /// A one-off webhook handed out with an interactive command
    ResponseUrl(String),
    /// A chat channel, posted to with the configured token
    Channel(String),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub unfurl_links: bool,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage {
            text: text.into(),
            unfurl_links: false,
        }
    }

    /// Same text, asking the chat client to expand link previews.
    pub fn unfurled(mut self) -> Self {
        self.unfurl_links = true;
        self
    }
}

/// A message read back from a channel's history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelMessage {
    pub text: String,
    pub user: Option<String>,
    /// Links the chat service already unfurled for this message
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

/// A search hit, with up to two preceding messages of context.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchMatch {
    pub text: String,
    pub user: Option<String>,
    pub previous: Option<ChannelMessage>,
    pub previous2: Option<ChannelMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlCheck {
    /// The URL answered with a success or redirect status
    Available,
    /// The URL answered with a status above 400
    Gone,
    /// Anything else, including exactly 400
    Inconclusive,
}

impl UrlCheck {
    pub fn from_status(status: u16) -> Self {
        match status {
            s if s < 400 => UrlCheck::Available,
            s if s > 400 => UrlCheck::Gone,
            _ => UrlCheck::Inconclusive,
        }
    }
}
