use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::services::{ChannelMessage, ChatError, ChatTransport, Destination, OutgoingMessage, SearchMatch};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// [`ChatTransport`] talking to the Slack Web API.
///
/// Response URLs work without a token. Channel posts, history and search
/// fail with [`ChatError::MissingToken`] when none is configured.
#[derive(Debug, Clone)]
pub struct SlackChat {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

impl SlackChat {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token: token.filter(|t| !t.is_empty()),
            api_base: SLACK_API_BASE.to_string(),
        })
    }

    /// Points API calls somewhere other than slack.com.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn token(&self) -> Result<&str, ChatError> {
        self.token.as_deref().ok_or(ChatError::MissingToken)
    }

    async fn api_get(&self, method: &str, params: &[(&str, &str)]) -> Result<serde_json::Value, ChatError> {
        let response = self
            .client
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(self.token()?)
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        check_ok(method, body)
    }
}

/// Fails unless a Web API response body says `"ok": true`.
pub(crate) fn check_ok(method: &str, body: serde_json::Value) -> Result<serde_json::Value, ChatError> {
    if body.get("ok").and_then(|ok| ok.as_bool()) == Some(true) {
        return Ok(body);
    }
    let reason = body
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("unknown_error");
    Err(ChatError::Api(format!("{method}: {reason}")))
}

#[derive(Deserialize, Default)]
struct RawAttachment {
    from_url: Option<String>,
    original_url: Option<String>,
    title_link: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawMessage {
    #[serde(default)]
    text: String,
    user: Option<String>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
}

impl From<RawMessage> for ChannelMessage {
    fn from(raw: RawMessage) -> Self {
        ChannelMessage {
            text: raw.text,
            user: raw.user.filter(|u| !u.is_empty()),
            attachment_urls: raw
                .attachments
                .into_iter()
                .filter_map(|a| a.from_url.or(a.original_url).or(a.title_link))
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawHistory {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMatch {
    #[serde(default)]
    text: String,
    user: Option<String>,
    previous: Option<RawMessage>,
    previous_2: Option<RawMessage>,
}

#[derive(Deserialize, Default)]
struct RawMatches {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawSearch {
    #[serde(default)]
    messages: RawMatches,
}

pub(crate) fn parse_history(body: serde_json::Value) -> Result<Vec<ChannelMessage>, ChatError> {
    let history: RawHistory = serde_json::from_value(body)
        .map_err(|e| ChatError::Api(format!("conversations.history: {e}")))?;
    Ok(history.messages.into_iter().map(Into::into).collect())
}

pub(crate) fn parse_search(body: serde_json::Value) -> Result<Vec<SearchMatch>, ChatError> {
    let search: RawSearch = serde_json::from_value(body)
        .map_err(|e| ChatError::Api(format!("search.messages: {e}")))?;
    Ok(search
        .messages
        .matches
        .into_iter()
        .map(|m| SearchMatch {
            text: m.text,
            user: m.user.filter(|u| !u.is_empty()),
            previous: m.previous.map(Into::into),
            previous2: m.previous_2.map(Into::into),
        })
        .collect())
}

#[async_trait]
impl ChatTransport for SlackChat {
    async fn post(&self, destination: &Destination, message: &OutgoingMessage) -> Result<(), ChatError> {
        match destination {
            Destination::ResponseUrl(url) => {
                self.client
                    .post(url)
                    .json(message)
                    .send()
                    .await?
                    .error_for_status()?;
            }
            Destination::Channel(channel) => {
                let body: serde_json::Value = self
                    .client
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(self.token()?)
                    .json(&json!({
                        "channel": channel,
                        "text": message.text,
                        "unfurl_links": message.unfurl_links,
                    }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                check_ok("chat.postMessage", body)?;
            }
        }
        debug!(?destination, "Posted message");
        Ok(())
    }

    async fn channel_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>, ChatError> {
        let body = self
            .api_get("conversations.history", &[("channel", channel_id)])
            .await?;
        parse_history(body)
    }

    async fn search_messages(&self, query: &str) -> Result<Vec<SearchMatch>, ChatError> {
        let body = self.api_get("search.messages", &[("query", query)]).await?;
        parse_search(body)
    }

    fn has_token(&self) -> bool {
        self.token.is_some()
    }
}
