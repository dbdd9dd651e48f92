//! Records shown in the dashboard panels.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::session::UserId;

/// A notification as listed in the notifications panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Backend id.
    pub id: i64,
    /// Category (`offer`, `shipment`, `balance`, `message`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Text shown to the user.
    pub message: String,
    /// Only ever flips from `false` to `true`.
    #[serde(default)]
    pub is_read: bool,
    /// Creation time.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Entity the notification is about (offer id, order id, ...).
    #[serde(default)]
    pub related_id: Option<i64>,
}

/// A conversation summary as listed in the messages panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Conversation id.
    pub id: i64,
    /// The other participant.
    pub sender_id: UserId,
    /// Display name of the other participant.
    #[serde(default)]
    pub sender_name: String,
    /// Preview of the latest message.
    #[serde(default)]
    pub last_message: String,
    /// Whether everything in the conversation has been read.
    pub read: bool,
    /// Unread messages in the conversation (at least 1 while unread).
    #[serde(default)]
    pub unread_count: u32,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Message {
    /// Contribution of this conversation to the unread message counter.
    #[must_use]
    pub fn unread_weight(&self) -> u32 {
        if self.read {
            0
        } else {
            self.unread_count.max(1)
        }
    }
}

/// Someone to start a chat with (e.g. from a pharmacy profile page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCounterpart {
    /// Their user id; becomes the active chat peer.
    pub user_id: UserId,
    /// Name shown in the chat window title.
    pub display_name: String,
    /// Avatar URL.
    pub avatar: Option<String>,
}

/// The conversation open in the chat window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSelection {
    /// Existing conversation, or `None` for a chat not started yet.
    pub conversation_id: Option<i64>,
    /// The other participant.
    pub peer: UserId,
    /// Window title.
    pub title: String,
    /// Avatar URL.
    pub avatar: Option<String>,
}

impl From<&Message> for ChatSelection {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: Some(message.id),
            peer: message.sender_id.clone(),
            title: message.sender_name.clone(),
            avatar: message.avatar.clone(),
        }
    }
}

impl From<ChatCounterpart> for ChatSelection {
    fn from(counterpart: ChatCounterpart) -> Self {
        Self {
            conversation_id: None,
            peer: counterpart.user_id,
            title: counterpart.display_name,
            avatar: counterpart.avatar,
        }
    }
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 and offset-less ISO timestamps, which the backend
/// emits for UTC values.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}
