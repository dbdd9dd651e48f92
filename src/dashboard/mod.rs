//! Dashboard session state.
//!
//! A [`Dashboard`] is the session-scoped handle to one [`PanelState`]:
//! panels, unread counters and the active chat peer. Clones share the same
//! state. Every mutation goes through a transition method, runs under one
//! lock, and publishes a fresh snapshot to observers.
//!
//! # Architecture
//!
//! ```text
//!   UI actions ──────────┐          ┌───── BackgroundMessageListener
//!   (toggle, click, ...) │          │      (record_incoming_message)
//!                        ▼          ▼
//!                   ┌──────────────────┐
//!                   │ Mutex<PanelState>│──► watch snapshot ──► observers
//!                   └────────┬─────────┘
//!                            │ ReadReceipt
//!                            ▼
//!                  NotificationBackend (spawned, fire-and-forget)
//! ```
//!
//! Backend acknowledgements are optimistic: local state changes first and
//! a failed backend call is logged, never retried or rolled back.

mod model;
mod state;

pub use model::{parse_timestamp, ChatCounterpart, ChatSelection, Message, Notification};
pub use state::{MessageDisposition, Panel, PanelState, ReadReceipt};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::session::UserId;

/// Backend calls the dashboard makes after read actions.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// `PUT /api/notifications/{id}/read`
    async fn mark_notification_read(&self, id: i64) -> anyhow::Result<()>;

    /// `PUT /api/notifications/read-all`
    async fn mark_all_notifications_read(&self) -> anyhow::Result<()>;

    /// `POST /api/chat/conversations/{id}/read`
    async fn mark_conversation_read(&self, conversation_id: i64) -> anyhow::Result<()>;
}

struct Inner {
    state: Mutex<PanelState>,
    snapshot_tx: watch::Sender<PanelState>,
    backend: Option<Arc<dyn NotificationBackend>>,
}

/// Shared handle to the dashboard state.
#[derive(Clone)]
pub struct Dashboard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("state", &*self.lock())
            .field("has_backend", &self.inner.backend.is_some())
            .finish()
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    /// Dashboard with no backend; read actions stay local.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Dashboard that reports read actions to `backend`.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn NotificationBackend>) -> Self {
        Self::build(Some(backend))
    }

    fn build(backend: Option<Arc<dyn NotificationBackend>>) -> Self {
        let (snapshot_tx, _rx) = watch::channel(PanelState::new());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PanelState::new()),
                snapshot_tx,
                backend,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PanelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition and publish the result if anything changed.
    fn update<R>(&self, transition: impl FnOnce(&mut PanelState) -> R) -> R {
        let mut state = self.lock();
        let result = transition(&mut state);
        self.inner.snapshot_tx.send_if_modified(|snapshot| {
            if *snapshot == *state {
                false
            } else {
                snapshot.clone_from(&state);
                true
            }
        });
        result
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> PanelState {
        self.lock().clone()
    }

    /// Receiver that sees every published state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<PanelState> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Unread notifications (including pushed ones not listed yet).
    #[must_use]
    pub fn unread_notification_count(&self) -> u32 {
        self.lock().unread_notification_count()
    }

    /// Unread chat messages.
    #[must_use]
    pub fn unread_message_count(&self) -> u32 {
        self.lock().unread_message_count()
    }

    /// Visible panel.
    #[must_use]
    pub fn visible_panel(&self) -> Panel {
        self.lock().visible_panel()
    }

    /// Peer of the open chat.
    #[must_use]
    pub fn active_chat_user_id(&self) -> Option<UserId> {
        self.lock().active_chat_user_id().cloned()
    }

    /// See [`PanelState::toggle_notifications_panel`].
    pub fn toggle_notifications_panel(&self) {
        self.update(PanelState::toggle_notifications_panel);
    }

    /// See [`PanelState::toggle_messages_panel`].
    pub fn toggle_messages_panel(&self) {
        self.update(PanelState::toggle_messages_panel);
    }

    /// See [`PanelState::toggle_cart_panel`].
    pub fn toggle_cart_panel(&self) {
        self.update(PanelState::toggle_cart_panel);
    }

    /// Mark every notification read locally, then tell the backend.
    pub fn mark_all_notifications_as_read(&self) {
        let receipt = self.update(PanelState::mark_all_notifications_as_read);
        self.send_receipt(receipt);
    }

    /// Open a notification in the modal; reports the read when it was unread.
    pub fn handle_notification_click(&self, id: i64) {
        if let Some(receipt) = self.update(|state| state.handle_notification_click(id)) {
            self.send_receipt(receipt);
        }
    }

    /// See [`PanelState::close_notification_modal`].
    pub fn close_notification_modal(&self) {
        self.update(PanelState::close_notification_modal);
    }

    /// See [`PanelState::record_pushed_notification`].
    pub fn record_pushed_notification(&self) {
        self.update(PanelState::record_pushed_notification);
    }

    /// See [`PanelState::replace_notifications`].
    pub fn replace_notifications(&self, notifications: Vec<Notification>) {
        self.update(|state| state.replace_notifications(notifications));
    }

    /// See [`PanelState::mark_all_messages_as_read`].
    pub fn mark_all_messages_as_read(&self) {
        self.update(PanelState::mark_all_messages_as_read);
    }

    /// Open a conversation from the messages panel and report it read.
    pub fn handle_message_click(&self, id: i64) {
        if let Some(receipt) = self.update(|state| state.handle_message_click(id)) {
            self.send_receipt(receipt);
        }
    }

    /// See [`PanelState::set_active_chat_user_id`].
    pub fn set_active_chat_user_id(&self, user_id: Option<UserId>) {
        self.update(|state| state.set_active_chat_user_id(user_id));
    }

    /// See [`PanelState::handle_start_chat`].
    pub fn handle_start_chat(&self, counterpart: ChatCounterpart) {
        self.update(|state| state.handle_start_chat(counterpart));
    }

    /// See [`PanelState::close_chat_window`].
    pub fn close_chat_window(&self) {
        self.update(PanelState::close_chat_window);
    }

    /// Classify and maybe count an incoming chat message, atomically with
    /// respect to every other transition.
    pub fn record_incoming_message(&self, sender: &UserId, me: &UserId) -> MessageDisposition {
        self.update(|state| state.record_incoming_message(sender, me))
    }

    /// See [`PanelState::replace_messages`].
    pub fn replace_messages(&self, messages: Vec<Message>) {
        self.update(|state| state.replace_messages(messages));
    }

    /// See [`PanelState::set_unread_message_count`].
    pub fn set_unread_message_count(&self, count: u32) {
        self.update(|state| state.set_unread_message_count(count));
    }

    /// Back to the initial state (logout, leaving the dashboard).
    pub fn reset(&self) {
        self.update(PanelState::reset);
    }

    fn send_receipt(&self, receipt: ReadReceipt) {
        let Some(backend) = self.inner.backend.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("[Dashboard] No runtime, skipping backend call {:?}", receipt);
            return;
        };

        runtime.spawn(async move {
            let result = match receipt {
                ReadReceipt::Notification(id) => backend.mark_notification_read(id).await,
                ReadReceipt::AllNotifications => backend.mark_all_notifications_read().await,
                ReadReceipt::Conversation(id) => backend.mark_conversation_read(id).await,
            };
            if let Err(e) = result {
                log::warn!("[Dashboard] Backend call {:?} failed: {:#}", receipt, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;

    /// Backend that records calls and can be told to fail.
    struct RecordingBackend {
        calls: mpsc::UnboundedSender<ReadReceipt>,
        fail: bool,
    }

    impl RecordingBackend {
        fn record(&self, receipt: ReadReceipt) -> anyhow::Result<()> {
            let _ = self.calls.send(receipt);
            if self.fail {
                anyhow::bail!("backend unavailable");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationBackend for RecordingBackend {
        async fn mark_notification_read(&self, id: i64) -> anyhow::Result<()> {
            self.record(ReadReceipt::Notification(id))
        }

        async fn mark_all_notifications_read(&self) -> anyhow::Result<()> {
            self.record(ReadReceipt::AllNotifications)
        }

        async fn mark_conversation_read(&self, conversation_id: i64) -> anyhow::Result<()> {
            self.record(ReadReceipt::Conversation(conversation_id))
        }
    }

    fn recording(fail: bool) -> (Dashboard, mpsc::UnboundedReceiver<ReadReceipt>) {
        let (calls, rx) = mpsc::unbounded_channel();
        let dashboard = Dashboard::with_backend(Arc::new(RecordingBackend { calls, fail }));
        (dashboard, rx)
    }

    fn unread_notification(id: i64) -> Notification {
        Notification {
            id,
            kind: "shipment".to_string(),
            message: "Kargo yolda".to_string(),
            is_read: false,
            created_at: Utc::now(),
            related_id: None,
        }
    }

    #[test]
    fn test_clones_share_state() {
        let dashboard = Dashboard::new();
        let other = dashboard.clone();
        other.toggle_messages_panel();
        assert_eq!(dashboard.visible_panel(), Panel::Messages);
    }

    #[test]
    fn test_watch_publishes_changes_only() {
        let dashboard = Dashboard::new();
        let mut rx = dashboard.watch();

        dashboard.close_chat_window();
        assert!(!rx.has_changed().unwrap());

        dashboard.record_pushed_notification();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().unread_notification_count(), 1);
    }

    #[test]
    fn test_transitions_without_runtime_stay_local() {
        let (dashboard, mut calls) = recording(false);
        dashboard.replace_notifications(vec![unread_notification(1)]);
        dashboard.mark_all_notifications_as_read();
        assert_eq!(dashboard.unread_notification_count(), 0);
        assert!(calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_all_notifies_backend() {
        let (dashboard, mut calls) = recording(false);
        dashboard.replace_notifications(vec![unread_notification(1), unread_notification(2)]);
        dashboard.mark_all_notifications_as_read();

        assert_eq!(dashboard.unread_notification_count(), 0);
        assert_eq!(calls.recv().await, Some(ReadReceipt::AllNotifications));
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_optimistic_state() {
        let (dashboard, mut calls) = recording(true);
        dashboard.replace_notifications(vec![unread_notification(3)]);
        dashboard.handle_notification_click(3);

        assert_eq!(calls.recv().await, Some(ReadReceipt::Notification(3)));
        tokio::task::yield_now().await;
        assert_eq!(dashboard.unread_notification_count(), 0);
        assert!(dashboard.snapshot().notifications()[0].is_read);
    }

    #[tokio::test]
    async fn test_message_click_reports_conversation() {
        let (dashboard, mut calls) = recording(false);
        dashboard.replace_messages(vec![Message {
            id: 40,
            sender_id: UserId::from("12"),
            sender_name: "Şifa Eczanesi".to_string(),
            last_message: "Stok var mı?".to_string(),
            read: false,
            unread_count: 2,
            avatar: None,
        }]);
        assert_eq!(dashboard.unread_message_count(), 2);

        dashboard.handle_message_click(40);
        assert_eq!(calls.recv().await, Some(ReadReceipt::Conversation(40)));
        assert_eq!(dashboard.unread_message_count(), 0);
        assert_eq!(dashboard.active_chat_user_id(), Some(UserId::from("12")));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let dashboard = Dashboard::new();
        let me = UserId::from("me");
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dashboard = dashboard.clone();
                let me = me.clone();
                std::thread::spawn(move || {
                    let sender = UserId::from(format!("sender-{i}"));
                    for _ in 0..100 {
                        dashboard.record_incoming_message(&sender, &me);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dashboard.unread_message_count(), 800);
    }

    #[test]
    fn test_reset_publishes_initial_state() {
        let dashboard = Dashboard::new();
        dashboard.toggle_cart_panel();
        dashboard.set_active_chat_user_id(Some(UserId::from("x")));
        let mut rx = dashboard.watch();
        dashboard.reset();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PanelState::new());
    }
}
