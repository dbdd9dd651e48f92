//! Headless listener.
//!
//! Logs in with the configured token, loads the dashboard from the REST
//! API, attaches the hub listeners and prints a status line every time a
//! counter changes, until Ctrl-C.
//!
//! ```bash
//! PHARMADESK_TOKEN=... pharmadesk-realtime listen --user-id 42 --role pharmacy --pharmacy-id 300
//! ```

use std::sync::Arc;

use anyhow::Result;

use super::require_token;
use crate::api::ApiClient;
use crate::config::Config;
use crate::dashboard::{Dashboard, PanelState};
use crate::listener::SessionListener;
use crate::session::{AuthSession, Role, Session};

/// Run until Ctrl-C.
pub async fn run(
    config: &Config,
    user_id: &str,
    role: Option<Role>,
    pharmacy_id: Option<&str>,
) -> Result<()> {
    require_token(config)?;

    let mut session = Session::new(user_id, role, config.token.clone());
    if let Some(pharmacy_id) = pharmacy_id {
        session = session.with_pharmacy_id(pharmacy_id);
    }
    let api = ApiClient::for_session(&config.api_url, &session)?;
    let dashboard = Dashboard::with_backend(Arc::new(api.clone()));
    api.refresh_dashboard(&dashboard, &session.user_id).await;

    let auth = AuthSession::new();
    let listener = SessionListener::from_config(&auth, config, dashboard.clone());
    auth.login(session);

    let mut snapshots = dashboard.watch();
    let mut chat_state = listener.chat_state();
    println!("{}", status_line(&dashboard.snapshot()));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = status_line(&snapshots.borrow_and_update());
                println!("{line}");
            }
            changed = chat_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = chat_state.borrow_and_update().clone();
                println!("chat hub: {state}");
            }
        }
    }

    println!("Shutting down...");
    auth.logout();
    drop(listener);
    Ok(())
}

/// One-line summary of the badges and the open chat.
fn status_line(state: &PanelState) -> String {
    let mut line = format!(
        "notifications: {} unread | messages: {} unread",
        state.unread_notification_count(),
        state.unread_message_count()
    );
    if let Some(peer) = state.active_chat_user_id() {
        line.push_str(&format!(" | chatting with {peer}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserId;

    #[test]
    fn test_status_line() {
        let mut state = PanelState::new();
        state.record_pushed_notification();
        state.record_incoming_message(&UserId::from("5"), &UserId::from("1"));
        state.record_incoming_message(&UserId::from("6"), &UserId::from("1"));
        assert_eq!(
            status_line(&state),
            "notifications: 1 unread | messages: 2 unread"
        );

        state.set_active_chat_user_id(Some(UserId::from("5")));
        assert_eq!(
            status_line(&state),
            "notifications: 1 unread | messages: 2 unread | chatting with 5"
        );
    }
}
