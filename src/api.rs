//! REST client for the notification and chat endpoints.
//!
//! Wraps the handful of backend calls the dashboard layer consumes:
//!
//! | Call                          | Endpoint                                   |
//! |-------------------------------|--------------------------------------------|
//! | [`ApiClient::notifications`]  | `GET /api/notifications`                   |
//! | [`ApiClient::unread_notification_count`] | `GET /api/notifications/unread-count` |
//! | [`ApiClient::mark_notification_read`] | `PUT /api/notifications/{id}/read`  |
//! | [`ApiClient::mark_all_notifications_read`] | `PUT /api/notifications/read-all` |
//! | [`ApiClient::conversations`]  | `GET /api/chat/conversations`              |
//! | [`ApiClient::unread_message_count`] | `GET /api/chat/unread-count`         |
//! | [`ApiClient::mark_conversation_read`] | `POST /api/chat/conversations/{id}/read` |
//!
//! Every call returns `anyhow::Result`; [`ApiClient::refresh_dashboard`]
//! is the degrade-gracefully variant that logs failures and keeps going.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::constants::HTTP_REQUEST_TIMEOUT;
use crate::dashboard::{Dashboard, Message, Notification, NotificationBackend};
use crate::session::{Session, UserId};

/// `GET /api/notifications/unread-count` body.
#[derive(Debug, Deserialize)]
struct NotificationCount {
    count: u32,
}

/// `GET /api/chat/unread-count` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageCount {
    unread_count: u32,
}

/// One participant of a conversation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    /// User id (string on the wire).
    pub user_id: UserId,
    /// Account name.
    #[serde(default)]
    pub user_name: Option<String>,
    /// Pharmacy display name.
    #[serde(default)]
    pub pharmacy_name: Option<String>,
    /// Presence flag at query time.
    #[serde(default)]
    pub is_online: bool,
}

/// One conversation as returned by `GET /api/chat/conversations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    /// Conversation id.
    pub id: i64,
    /// Group name for group conversations.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Time of the latest message.
    #[serde(default)]
    pub last_message_at: Option<String>,
    /// Preview of the latest message.
    #[serde(default)]
    pub last_message_preview: Option<String>,
    /// Messages from others not yet read.
    #[serde(default)]
    pub unread_count: u32,
    /// Everyone in the conversation, including the caller.
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
}

impl ConversationDto {
    /// Summarize for the messages panel from `me`'s point of view.
    ///
    /// Conversations without another participant are skipped.
    #[must_use]
    pub fn into_message(self, me: &UserId) -> Option<Message> {
        let other = self.participants.into_iter().find(|p| &p.user_id != me)?;
        let sender_name = self
            .group_name
            .or(other.pharmacy_name)
            .or(other.user_name)
            .unwrap_or_else(|| other.user_id.to_string());
        Some(Message {
            id: self.id,
            sender_id: other.user_id,
            sender_name,
            last_message: self.last_message_preview.unwrap_or_default(),
            read: self.unread_count == 0,
            unread_count: self.unread_count,
            avatar: None,
        })
    }
}

/// Authenticated client for the backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Client for `base_url` authenticating with `token`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Client for the logged-in `session`.
    pub fn for_session(base_url: &str, session: &Session) -> Result<Self> {
        Self::new(base_url, &session.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("GET {path} returned {status}");
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid response from GET {path}"))
    }

    async fn send_empty(&self, method: reqwest::Method, path: &str) -> Result<()> {
        let url = self.url(path);
        let response = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .with_context(|| format!("{method} {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{method} {path} returned {status}");
        }
        log::debug!("[Api] {} {} -> {}", method, path, status);
        Ok(())
    }

    /// All notifications of the current user.
    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        self.get_json("/api/notifications").await
    }

    /// Server-side unread notification count.
    pub async fn unread_notification_count(&self) -> Result<u32> {
        let body: NotificationCount = self.get_json("/api/notifications/unread-count").await?;
        Ok(body.count)
    }

    /// Raw conversations of the current user.
    pub async fn conversations(&self) -> Result<Vec<ConversationDto>> {
        self.get_json("/api/chat/conversations").await
    }

    /// Conversations summarized for the messages panel.
    pub async fn messages(&self, me: &UserId) -> Result<Vec<Message>> {
        let conversations = self.conversations().await?;
        Ok(conversations
            .into_iter()
            .filter_map(|conversation| conversation.into_message(me))
            .collect())
    }

    /// Server-side unread chat message count.
    pub async fn unread_message_count(&self) -> Result<u32> {
        let body: MessageCount = self.get_json("/api/chat/unread-count").await?;
        Ok(body.unread_count)
    }

    /// Load notifications and conversations into `dashboard`.
    ///
    /// Each part is independent: a failing call is logged and leaves that
    /// part of the dashboard as it was.
    pub async fn refresh_dashboard(&self, dashboard: &Dashboard, me: &UserId) {
        match self.notifications().await {
            Ok(notifications) => {
                log::info!("[Api] Loaded {} notifications", notifications.len());
                dashboard.replace_notifications(notifications);
            }
            Err(e) => log::warn!("[Api] Failed to load notifications: {:#}", e),
        }

        match self.messages(me).await {
            Ok(messages) => {
                log::info!("[Api] Loaded {} conversations", messages.len());
                dashboard.replace_messages(messages);
            }
            Err(e) => log::warn!("[Api] Failed to load conversations: {:#}", e),
        }
    }
}

#[async_trait]
impl NotificationBackend for ApiClient {
    async fn mark_notification_read(&self, id: i64) -> Result<()> {
        self.send_empty(reqwest::Method::PUT, &format!("/api/notifications/{id}/read"))
            .await
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        self.send_empty(reqwest::Method::PUT, "/api/notifications/read-all")
            .await
    }

    async fn mark_conversation_read(&self, conversation_id: i64) -> Result<()> {
        self.send_empty(
            reqwest::Method::POST,
            &format!("/api/chat/conversations/{conversation_id}/read"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation(body: serde_json::Value) -> ConversationDto {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_into_message_picks_other_participant() {
        let dto = conversation(json!({
            "id": 3,
            "type": 0,
            "lastMessageAt": "2025-03-01T09:30:00",
            "lastMessagePreview": "Fiyat güncellendi",
            "unreadCount": 2,
            "participants": [
                {"userId": "1", "userName": "me", "isOnline": true},
                {"userId": "9", "userName": "deva", "pharmacyName": "Deva Eczanesi", "isOnline": false}
            ]
        }));
        let message = dto.into_message(&UserId::from("1")).unwrap();
        assert_eq!(message.id, 3);
        assert_eq!(message.sender_id, UserId::from("9"));
        assert_eq!(message.sender_name, "Deva Eczanesi");
        assert_eq!(message.last_message, "Fiyat güncellendi");
        assert!(!message.read);
        assert_eq!(message.unread_weight(), 2);
    }

    #[test]
    fn test_into_message_group_name_wins() {
        let dto = conversation(json!({
            "id": 4,
            "groupName": "Bölge Eczaneleri",
            "unreadCount": 0,
            "participants": [{"userId": "1"}, {"userId": "2"}]
        }));
        let message = dto.into_message(&UserId::from("1")).unwrap();
        assert_eq!(message.sender_name, "Bölge Eczaneleri");
        assert!(message.read);
    }

    #[test]
    fn test_into_message_without_other_participant() {
        let dto = conversation(json!({"id": 5, "participants": [{"userId": "1"}]}));
        assert!(dto.into_message(&UserId::from("1")).is_none());
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new("http://localhost:8081/", "t").unwrap();
        assert_eq!(
            client.url("/api/notifications"),
            "http://localhost:8081/api/notifications"
        );
    }
}
