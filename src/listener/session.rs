//! Session supervisor.
//!
//! Follows the [`AuthSession`] and keeps exactly one set of hub
//! connections and listeners alive for the current session:
//!
//! ```text
//!   token refresh ──────────► drop old set ──► connect chat (+ notifications)
//!                                              attach listeners
//!   login (new or other user) ► drop old set ──► reset dashboard ──► connect
//!   logout ─────────────────► drop old set ──► reset dashboard
//! ```
//!
//! The old set is always dropped before the new one is built, so at no
//! point do two listeners count the same message.

use std::future::pending;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BackgroundMessageListener, ListenerGuard};
use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::hub::{ConnectionState, HubOptions, RealtimeConnection};
use crate::session::{AuthSession, Session};

/// Connections and listeners for one session.
struct Attached {
    generation: u64,
    // Guards first: listeners stop before their connections shut down.
    _message_listener: ListenerGuard,
    _notification_listener: Option<ListenerGuard>,
    chat_state: watch::Receiver<ConnectionState>,
    _chat: RealtimeConnection,
    _notifications: Option<RealtimeConnection>,
}

impl Attached {
    fn build(
        session: &Session,
        chat_options: &HubOptions,
        notification_options: Option<&HubOptions>,
        dashboard: &Dashboard,
    ) -> Self {
        let chat = RealtimeConnection::connect(chat_options.clone(), &session.token);
        let message_listener =
            BackgroundMessageListener::attach(&chat, session, dashboard.clone());

        let notifications = notification_options
            .map(|options| RealtimeConnection::connect(options.clone(), &session.token));
        let notification_listener = notifications.as_ref().map(|connection| {
            BackgroundMessageListener::attach_notifications(connection, dashboard.clone())
        });

        Self {
            generation: session.generation(),
            _message_listener: message_listener,
            _notification_listener: notification_listener,
            chat_state: chat.state_changes(),
            _chat: chat,
            _notifications: notifications,
        }
    }
}

/// Keeps hub connections and listeners in step with the session.
///
/// Must be created inside a Tokio runtime; dropping it tears everything
/// down.
#[derive(Debug)]
pub struct SessionListener {
    handle: JoinHandle<()>,
    chat_state: watch::Receiver<ConnectionState>,
}

impl SessionListener {
    /// Supervise `auth`, connecting to the chat hub and, when given, the
    /// notification hub.
    pub fn spawn(
        auth: &AuthSession,
        chat: HubOptions,
        notifications: Option<HubOptions>,
        dashboard: Dashboard,
    ) -> Self {
        let (state_tx, chat_state) = watch::channel(ConnectionState::Disconnected);
        let mut sessions = auth.subscribe();
        // Mark the current value unseen so the first loop iteration acts on it.
        sessions.mark_changed();

        let handle = tokio::spawn(async move {
            let mut attached: Option<Attached> = None;
            loop {
                tokio::select! {
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let session = sessions.borrow_and_update().clone();
                        let previous = attached.take().map(|old| old.generation);
                        match session {
                            Some(session) => {
                                // A different login replaced the attached one; a logout in
                                // between may have been coalesced away by the watch channel.
                                if previous.is_some_and(|g| g != session.generation()) {
                                    log::info!("[Listener] New login, resetting dashboard");
                                    dashboard.reset();
                                }
                                log::info!("[Listener] Connecting hubs for user {}", session.user_id);
                                let next = Attached::build(
                                    &session,
                                    &chat,
                                    notifications.as_ref(),
                                    &dashboard,
                                );
                                state_tx.send_replace(next.chat_state.borrow().clone());
                                attached = Some(next);
                            }
                            None => {
                                state_tx.send_replace(ConnectionState::Disconnected);
                                if previous.is_some() {
                                    log::info!("[Listener] Session ended, resetting dashboard");
                                    dashboard.reset();
                                }
                            }
                        }
                    }
                    state = next_chat_state(attached.as_mut()) => {
                        state_tx.send_replace(state);
                    }
                }
            }
            log::debug!("[Listener] Session supervisor stopped");
        });

        Self { handle, chat_state }
    }

    /// Supervise `auth` using the hubs named in `config`.
    pub fn from_config(auth: &AuthSession, config: &Config, dashboard: Dashboard) -> Self {
        Self::spawn(
            auth,
            HubOptions::chat(config),
            Some(HubOptions::notifications(config)),
            dashboard,
        )
    }

    /// State of the current session's chat connection.
    #[must_use]
    pub fn chat_state(&self) -> watch::Receiver<ConnectionState> {
        self.chat_state.clone()
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Next state change of the current chat connection; never resolves when
/// there is none.
async fn next_chat_state(attached: Option<&mut Attached>) -> ConnectionState {
    let Some(attached) = attached else {
        return pending().await;
    };
    if attached.chat_state.changed().await.is_err() {
        return pending().await;
    }
    attached.chat_state.borrow_and_update().clone()
}
