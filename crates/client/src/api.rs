// REST collaborators: the one-time history fetch and the profile fetch.
//
// Plain request/response calls beside the live channel. Failures surface
// as `ChatError::Fetch` once per call; nothing here retries — the live
// channel keeps working regardless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::error::ChatError;
use parley_common::types::{Message, UserProfile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

/// The history-fetch collaborator the session controller consumes: an
/// ordered batch of messages for one room. Implemented over REST in
/// production and scripted in tests.
#[async_trait]
pub trait HistoryProvider: Send + Sync + 'static {
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<Message>, ChatError>;
}

/// History entry as the server returns it.
#[derive(Debug, Clone, Deserialize)]
struct HistoryEntry {
    user: HistoryUser,
    message: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct HistoryUser {
    username: String,
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        Message::new(entry.user.username, entry.message, entry.created_at)
    }
}

#[derive(Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ChatApi {
    pub fn new(base_url: Url, auth_token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url, auth_token }
    }

    /// Fetch the authenticated user's profile.
    pub async fn fetch_profile(&self) -> Result<UserProfile, ChatError> {
        let url = self.endpoint("api/users/profile")?;
        self.get_json(url).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base_url
            .join(path)
            .map_err(|error| ChatError::Fetch(format!("invalid endpoint `{path}`: {error}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ChatError> {
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|error| ChatError::Fetch(format!("request to {url} failed: {error}")))?
            .error_for_status()
            .map_err(|error| ChatError::Fetch(format!("server rejected {url}: {error}")))?;
        response
            .json()
            .await
            .map_err(|error| ChatError::Fetch(format!("malformed payload from {url}: {error}")))
    }
}

#[async_trait]
impl HistoryProvider for ChatApi {
    /// Fetch the ordered message history for `room_id`, mapped to the
    /// canonical shape. The server's order is preserved as-is.
    async fn fetch_history(&self, room_id: &str) -> Result<Vec<Message>, ChatError> {
        let url = self.endpoint(&format!("api/chats/{room_id}"))?;
        let entries: Vec<HistoryEntry> = self.get_json(url).await?;
        Ok(entries.into_iter().map(Message::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_entries_map_to_canonical_messages() {
        let raw = json!([
            { "user": { "username": "alice" }, "message": "hi",
              "createdAt": "2024-03-01T10:00:00Z" },
            { "user": { "username": "bob" }, "message": "yo",
              "createdAt": "2024-03-01T10:00:05Z" }
        ]);

        let entries: Vec<HistoryEntry> =
            serde_json::from_value(raw).expect("history payload should decode");
        let messages: Vec<Message> = entries.into_iter().map(Message::from).collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].text, "hi");
        assert!(messages[0].timestamp < messages[1].timestamp);
    }
}
