//! PharmaDesk Realtime - dashboard notification and unread-count core.
//!
//! This crate keeps a pharmacy dashboard's badges and panels in step with
//! the backend: it holds the push connection to the chat and notification
//! hubs, counts unread messages as they arrive, and tracks which panel and
//! chat the user has open.
//!
//! # Architecture
//!
//! ```text
//!   AuthSession ──► SessionListener ──► RealtimeConnection (hub)
//!                         │                     │ ReceiveMessage
//!                         ▼                     ▼
//!                   BackgroundMessageListener ──► Dashboard ──► observers
//!                                                   │
//!                                                   ▼
//!                                               ApiClient (REST)
//! ```
//!
//! # Modules
//!
//! - [`hub`] - SignalR hub connection, subscriptions and reconnect
//! - [`session`] - Logged-in user, roles and role gating
//! - [`dashboard`] - Panel state machine and the shared dashboard handle
//! - [`listener`] - Background listeners and the session supervisor
//! - [`api`] - REST client for notifications and conversations
//! - [`config`] - Configuration loading/saving

pub mod api;
pub mod commands;
pub mod dashboard;
pub mod hub;
pub mod listener;
pub mod session;
pub mod ws;

pub mod config;
pub mod constants;
pub mod env;

// Re-export commonly used types
pub use api::ApiClient;
pub use config::Config;
pub use dashboard::{Dashboard, NotificationBackend, Panel, PanelState};
pub use hub::{ConnectionState, HubOptions, RealtimeConnection};
pub use listener::{BackgroundMessageListener, ListenerGuard, SessionListener};
pub use session::{AuthSession, Role, RoleGate, Session, UserId};
