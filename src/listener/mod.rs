//! Background listeners that turn hub events into dashboard changes.
//!
//! - [`BackgroundMessageListener`] - `ReceiveMessage` on the chat hub:
//!   counts unread messages, and tells the hub when the open chat changes
//! - [`BackgroundMessageListener::attach_notifications`] -
//!   `ReceiveNotification` on the notification hub: bumps the unread
//!   notification badge
//! - [`SessionListener`] - follows the [`crate::AuthSession`] and rebuilds
//!   connections and listeners whenever the session changes
//!
//! Every listener lives exactly as long as its [`ListenerGuard`]. Dropping
//! the guard aborts the task and releases its subscriptions, so a stale
//! listener can never count a message twice.

mod session;

pub use session::SessionListener;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::constants::{
    EVENT_RECEIVE_MESSAGE, EVENT_RECEIVE_NOTIFICATION, METHOD_MARK_MESSAGES_AS_READ,
};
use crate::dashboard::{Dashboard, MessageDisposition};
use crate::hub::{HubInvoker, RealtimeConnection, Subscription};
use crate::session::{Session, UserId};

/// A `ReceiveMessage` payload after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Who sent it.
    pub sender_id: UserId,
    /// Message id, when the server sent one.
    pub id: Option<i64>,
    /// Conversation the message belongs to.
    pub conversation_id: Option<i64>,
    /// Sender display name.
    pub sender_name: Option<String>,
    /// Message body.
    pub content: Option<String>,
}

impl IncomingMessage {
    /// Validate a raw payload.
    ///
    /// The sender id may arrive as `senderId` or `SenderId`, as a string or
    /// a number. A payload without a usable sender id yields `None`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        let sender_id = ["senderId", "SenderId"]
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(id_string)?;

        let field = |camel: &str, pascal: &str| object.get(camel).or_else(|| object.get(pascal));
        Some(Self {
            sender_id: UserId(sender_id),
            id: field("id", "Id").and_then(Value::as_i64),
            conversation_id: field("conversationId", "ConversationId").and_then(Value::as_i64),
            sender_name: field("senderName", "SenderName")
                .and_then(Value::as_str)
                .map(str::to_string),
            content: field("content", "Content")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Normalize an id value to its string form. Empty strings and zero are
/// treated as absent.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        _ => None,
    }
}

/// A `ReceiveNotification` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushedNotification {
    /// Text to show.
    #[serde(default)]
    pub message: String,
    /// Category.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Server timestamp, as sent.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Keeps a listener task alive; dropping it stops the task.
#[derive(Debug)]
#[must_use = "the listener stops when the guard is dropped"]
pub struct ListenerGuard {
    handle: JoinHandle<()>,
}

impl ListenerGuard {
    /// Whether the task has ended (connection closed for good).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Counts chat messages that arrive outside the open conversation.
pub struct BackgroundMessageListener {
    me: UserId,
    pharmacy_id: Option<UserId>,
    dashboard: Dashboard,
    invoker: HubInvoker,
    messages: Subscription,
    open_conversation: Option<i64>,
}

impl std::fmt::Debug for BackgroundMessageListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundMessageListener")
            .field("me", &self.me)
            .field("pharmacy_id", &self.pharmacy_id)
            .field("open_conversation", &self.open_conversation)
            .finish_non_exhaustive()
    }
}

impl BackgroundMessageListener {
    /// Listen to `ReceiveMessage` on `connection` on behalf of `session`.
    ///
    /// Messages sent under the session's user id or pharmacy id are echoes
    /// and never counted.
    ///
    /// Must be called inside a Tokio runtime. The subscription is
    /// registered before this returns, so no event that arrives afterwards
    /// is missed.
    pub fn attach(
        connection: &RealtimeConnection,
        session: &Session,
        dashboard: Dashboard,
    ) -> ListenerGuard {
        let open_conversation = current_conversation(&dashboard);
        let listener = Self {
            me: session.user_id.clone(),
            pharmacy_id: session.pharmacy_id.clone(),
            invoker: connection.invoker(),
            messages: connection.subscribe(EVENT_RECEIVE_MESSAGE),
            dashboard,
            open_conversation,
        };
        log::debug!("[Listener] Attached for user {}", listener.me);
        ListenerGuard {
            handle: tokio::spawn(listener.run()),
        }
    }

    /// Listen to `ReceiveNotification` on `connection`.
    pub fn attach_notifications(
        connection: &RealtimeConnection,
        dashboard: Dashboard,
    ) -> ListenerGuard {
        let mut notifications = connection.subscribe(EVENT_RECEIVE_NOTIFICATION);
        ListenerGuard {
            handle: tokio::spawn(async move {
                while let Some(arguments) = notifications.recv().await {
                    handle_pushed_notification(&dashboard, &arguments);
                }
                log::debug!("[Listener] Notification stream ended");
            }),
        }
    }

    async fn run(mut self) {
        let mut snapshots = self.dashboard.watch();
        loop {
            tokio::select! {
                event = self.messages.recv() => match event {
                    Some(arguments) => self.handle_message(&arguments),
                    None => break,
                },
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let opened = snapshots
                        .borrow_and_update()
                        .selected_chat()
                        .and_then(|chat| chat.conversation_id);
                    self.on_conversation_opened(opened);
                }
            }
        }
        log::debug!("[Listener] Message stream ended for user {}", self.me);
    }

    fn handle_message(&self, arguments: &[Value]) {
        let Some(message) = arguments.first().and_then(IncomingMessage::from_payload) else {
            log::debug!("[Listener] Skipping message without sender id");
            return;
        };

        if self.pharmacy_id.as_ref() == Some(&message.sender_id) {
            log::trace!("[Listener] Echo of own pharmacy message");
            return;
        }

        match self.dashboard.record_incoming_message(&message.sender_id, &self.me) {
            MessageDisposition::Counted => log::debug!(
                "[Listener] Unread message from {} (now {})",
                message.sender_id,
                self.dashboard.unread_message_count()
            ),
            MessageDisposition::ActiveChat => {
                log::trace!("[Listener] Message from open chat {}", message.sender_id);
            }
            MessageDisposition::OwnMessage => {}
        }
    }

    fn on_conversation_opened(&mut self, opened: Option<i64>) {
        if opened == self.open_conversation {
            return;
        }
        self.open_conversation = opened;
        if let Some(conversation_id) = opened {
            self.invoker
                .invoke(METHOD_MARK_MESSAGES_AS_READ, vec![json!(conversation_id)]);
        }
    }
}

fn current_conversation(dashboard: &Dashboard) -> Option<i64> {
    dashboard
        .snapshot()
        .selected_chat()
        .and_then(|chat| chat.conversation_id)
}

fn handle_pushed_notification(dashboard: &Dashboard, arguments: &[Value]) {
    let notification = arguments
        .first()
        .and_then(|payload| serde_json::from_value::<PushedNotification>(payload.clone()).ok())
        .unwrap_or_default();
    dashboard.record_pushed_notification();
    log::info!(
        "[Listener] Notification ({}): {}",
        if notification.kind.is_empty() {
            "unknown"
        } else {
            notification.kind.as_str()
        },
        notification.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_payload_camel_case_string() {
        let message = IncomingMessage::from_payload(&json!({
            "id": 91,
            "conversationId": 4,
            "content": "Merhaba",
            "senderId": "17",
            "senderName": "Deva Eczanesi",
            "sentAt": "2025-03-01T09:30:00Z",
            "isRead": false
        }))
        .unwrap();
        assert_eq!(message.sender_id, UserId::from("17"));
        assert_eq!(message.id, Some(91));
        assert_eq!(message.conversation_id, Some(4));
        assert_eq!(message.sender_name.as_deref(), Some("Deva Eczanesi"));
        assert_eq!(message.content.as_deref(), Some("Merhaba"));
    }

    #[test]
    fn test_from_payload_pascal_case_number() {
        let message = IncomingMessage::from_payload(&json!({
            "SenderId": 17,
            "Content": "Hi"
        }))
        .unwrap();
        assert_eq!(message.sender_id, UserId::from("17"));
        assert_eq!(message.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_from_payload_falls_back_when_camel_case_is_empty() {
        let message = IncomingMessage::from_payload(&json!({
            "senderId": "",
            "SenderId": "5"
        }))
        .unwrap();
        assert_eq!(message.sender_id, UserId::from("5"));
    }

    #[test]
    fn test_from_payload_rejects_missing_sender() {
        assert!(IncomingMessage::from_payload(&json!({"content": "x"})).is_none());
        assert!(IncomingMessage::from_payload(&json!({"senderId": null})).is_none());
        assert!(IncomingMessage::from_payload(&json!({"senderId": 0})).is_none());
        assert!(IncomingMessage::from_payload(&json!({"senderId": ["1"]})).is_none());
        assert!(IncomingMessage::from_payload(&json!("17")).is_none());
    }

    #[test]
    fn test_pushed_notification_counts_even_when_malformed() {
        let dashboard = Dashboard::new();
        handle_pushed_notification(
            &dashboard,
            &[json!({"message": "Yeni teklif", "type": "offer", "timestamp": "2025-03-01T09:30:00Z", "senderId": 3})],
        );
        handle_pushed_notification(&dashboard, &[json!(42)]);
        handle_pushed_notification(&dashboard, &[]);
        assert_eq!(dashboard.unread_notification_count(), 3);
    }

    #[tokio::test]
    async fn test_pharmacy_id_echo_is_not_counted() {
        let connection = RealtimeConnection::connect(
            crate::hub::HubOptions::new("http://127.0.0.1:1/hubs/chat"),
            "",
        );
        let session = Session::new("7", None, "").with_pharmacy_id("300");
        let dashboard = Dashboard::new();
        let listener = BackgroundMessageListener {
            me: session.user_id.clone(),
            pharmacy_id: session.pharmacy_id.clone(),
            dashboard: dashboard.clone(),
            invoker: connection.invoker(),
            messages: connection.subscribe(EVENT_RECEIVE_MESSAGE),
            open_conversation: None,
        };

        listener.handle_message(&[json!({"senderId": 300})]);
        listener.handle_message(&[json!({"SenderId": "7"})]);
        assert_eq!(dashboard.unread_message_count(), 0);

        listener.handle_message(&[json!({"senderId": 301})]);
        assert_eq!(dashboard.unread_message_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_on_disconnected_connection_ends() {
        let connection = RealtimeConnection::connect(
            crate::hub::HubOptions::new("http://127.0.0.1:1/hubs/chat"),
            "",
        );
        let session = Session::new("me", None, "");
        let guard = BackgroundMessageListener::attach(&connection, &session, Dashboard::new());
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !guard.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
