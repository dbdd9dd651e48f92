//! Panel state machine.
//!
//! `PanelState` is plain data plus the transitions allowed on it. It does
//! no I/O; transitions that need a backend call report it through their
//! return value and [`crate::Dashboard`] performs the call.

use super::model::{ChatCounterpart, ChatSelection, Message, Notification};
use crate::session::UserId;

/// Which slide-in panel is visible. At most one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Panel {
    /// Nothing open.
    #[default]
    None,
    /// Notifications list.
    Notifications,
    /// Conversations list.
    Messages,
    /// Shopping cart.
    Cart,
}

/// What happened to an incoming chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Sent by the current user (echo).
    OwnMessage,
    /// Belongs to the open chat; the chat window marks it read.
    ActiveChat,
    /// Counted as unread.
    Counted,
}

/// Backend call owed after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReceipt {
    /// One notification was read.
    Notification(i64),
    /// Every notification was read.
    AllNotifications,
    /// A conversation was opened.
    Conversation(i64),
}

/// Dashboard panels, unread counters and the active chat peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelState {
    notifications: Vec<Notification>,
    messages: Vec<Message>,
    pending_notifications: u32,
    unread_message_count: u32,
    active_chat_user_id: Option<UserId>,
    visible_panel: Panel,
    selected_notification: Option<Notification>,
    selected_chat: Option<ChatSelection>,
}

impl PanelState {
    /// Initial state: nothing open, nothing unread.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Queries ----

    /// Notifications, newest first.
    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Conversation summaries.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Unread notifications, including pushed ones not listed yet.
    #[must_use]
    pub fn unread_notification_count(&self) -> u32 {
        let listed = self.notifications.iter().filter(|n| !n.is_read).count();
        u32::try_from(listed)
            .unwrap_or(u32::MAX)
            .saturating_add(self.pending_notifications)
    }

    /// Unread chat messages.
    #[must_use]
    pub fn unread_message_count(&self) -> u32 {
        self.unread_message_count
    }

    /// Peer of the chat currently open, if any.
    #[must_use]
    pub fn active_chat_user_id(&self) -> Option<&UserId> {
        self.active_chat_user_id.as_ref()
    }

    /// Visible panel.
    #[must_use]
    pub fn visible_panel(&self) -> Panel {
        self.visible_panel
    }

    /// Notification shown in the detail modal.
    #[must_use]
    pub fn selected_notification(&self) -> Option<&Notification> {
        self.selected_notification.as_ref()
    }

    /// Conversation shown in the chat window.
    #[must_use]
    pub fn selected_chat(&self) -> Option<&ChatSelection> {
        self.selected_chat.as_ref()
    }

    // ---- Panels ----

    /// Open the notifications panel, or close it if already open.
    pub fn toggle_notifications_panel(&mut self) {
        self.toggle(Panel::Notifications);
    }

    /// Open the messages panel, or close it if already open.
    pub fn toggle_messages_panel(&mut self) {
        self.toggle(Panel::Messages);
    }

    /// Open the cart panel, or close it if already open.
    pub fn toggle_cart_panel(&mut self) {
        self.toggle(Panel::Cart);
    }

    fn toggle(&mut self, panel: Panel) {
        self.visible_panel = if self.visible_panel == panel {
            Panel::None
        } else {
            panel
        };
    }

    // ---- Notifications ----

    /// Mark every notification read and zero the counter.
    pub fn mark_all_notifications_as_read(&mut self) -> ReadReceipt {
        for notification in &mut self.notifications {
            notification.is_read = true;
        }
        self.pending_notifications = 0;
        ReadReceipt::AllNotifications
    }

    /// Open a notification in the modal, mark it read, close the panel.
    ///
    /// Returns a receipt only when the notification was unread. Unknown ids
    /// change nothing.
    pub fn handle_notification_click(&mut self, id: i64) -> Option<ReadReceipt> {
        let notification = self.notifications.iter_mut().find(|n| n.id == id)?;
        let was_unread = !notification.is_read;
        notification.is_read = true;
        self.selected_notification = Some(notification.clone());
        self.visible_panel = Panel::None;
        was_unread.then_some(ReadReceipt::Notification(id))
    }

    /// Close the notification modal. Counts are untouched.
    pub fn close_notification_modal(&mut self) {
        self.selected_notification = None;
    }

    /// A notification was pushed over the hub but is not listed yet.
    pub fn record_pushed_notification(&mut self) {
        self.pending_notifications = self.pending_notifications.saturating_add(1);
    }

    /// Load the notification list from the backend.
    ///
    /// The list is authoritative: previously pushed notifications are
    /// assumed to be part of it.
    pub fn replace_notifications(&mut self, mut notifications: Vec<Notification>) {
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.notifications = notifications;
        self.pending_notifications = 0;
    }

    // ---- Messages ----

    /// Mark every conversation read and zero the counter.
    pub fn mark_all_messages_as_read(&mut self) {
        for message in &mut self.messages {
            message.read = true;
            message.unread_count = 0;
        }
        self.unread_message_count = 0;
    }

    /// Open a conversation from the messages panel.
    ///
    /// Selects it in the chat window, makes its sender the active chat
    /// peer, marks it read and closes the panel. Unknown ids change nothing.
    pub fn handle_message_click(&mut self, id: i64) -> Option<ReadReceipt> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        let weight = message.unread_weight();
        message.read = true;
        message.unread_count = 0;
        let selection = ChatSelection::from(&*message);

        self.unread_message_count = self.unread_message_count.saturating_sub(weight);
        self.active_chat_user_id = Some(selection.peer.clone());
        self.selected_chat = Some(selection);
        self.visible_panel = Panel::None;
        Some(ReadReceipt::Conversation(id))
    }

    /// Set (or clear) the peer whose messages must not be counted.
    pub fn set_active_chat_user_id(&mut self, user_id: Option<UserId>) {
        self.active_chat_user_id = user_id;
    }

    /// Start a chat with `counterpart`: select it, make it the active peer
    /// and close every panel.
    pub fn handle_start_chat(&mut self, counterpart: ChatCounterpart) {
        let existing = self
            .messages
            .iter()
            .find(|m| m.sender_id == counterpart.user_id)
            .map(|m| m.id);
        let mut selection = ChatSelection::from(counterpart);
        selection.conversation_id = existing;

        self.active_chat_user_id = Some(selection.peer.clone());
        self.selected_chat = Some(selection);
        self.visible_panel = Panel::None;
    }

    /// Close the chat window. Messages from that peer count again.
    pub fn close_chat_window(&mut self) {
        self.selected_chat = None;
        self.active_chat_user_id = None;
    }

    /// Classify an incoming chat message and count it when appropriate.
    ///
    /// The active peer is read here, at increment time.
    pub fn record_incoming_message(&mut self, sender: &UserId, me: &UserId) -> MessageDisposition {
        if sender == me {
            return MessageDisposition::OwnMessage;
        }
        if self.active_chat_user_id.as_ref() == Some(sender) {
            return MessageDisposition::ActiveChat;
        }
        self.unread_message_count = self.unread_message_count.saturating_add(1);
        MessageDisposition::Counted
    }

    /// Load conversation summaries from the backend and recompute the
    /// counter from them.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.unread_message_count = messages
            .iter()
            .fold(0_u32, |total, m| total.saturating_add(m.unread_weight()));
        self.messages = messages;
    }

    /// Overwrite the counter with the backend's total.
    pub fn set_unread_message_count(&mut self, count: u32) {
        self.unread_message_count = count;
    }

    /// Back to the initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
