//! Crate-wide constants for the real-time coordination layer.
//!
//! Centralizes protocol strings, paths and timing defaults so the hub,
//! the REST client and the configuration share one source of truth.
//!
//! # Categories
//!
//! - **Endpoints**: default API URL and hub paths
//! - **Hub protocol**: SignalR framing and event names
//! - **Timing**: keep-alive, server timeout and reconnect schedule

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Default backend base URL (matches the web app's `NEXT_PUBLIC_API_URL` fallback).
pub const DEFAULT_API_URL: &str = "http://localhost:8081";

/// Path of the chat hub relative to the API base URL.
pub const DEFAULT_CHAT_HUB_PATH: &str = "/hubs/chat";

/// Path of the notification hub relative to the API base URL.
pub const DEFAULT_NOTIFICATION_HUB_PATH: &str = "/hubs/notifications";

// ============================================================================
// Hub protocol
// ============================================================================

/// ASCII record separator terminating every SignalR JSON frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub event carrying a chat message.
pub const EVENT_RECEIVE_MESSAGE: &str = "ReceiveMessage";

/// Hub event carrying a pushed notification.
pub const EVENT_RECEIVE_NOTIFICATION: &str = "ReceiveNotification";

/// Hub method that marks a conversation's messages as read.
pub const METHOD_MARK_MESSAGES_AS_READ: &str = "MarkMessagesAsRead";

/// Events buffered per subscription; newer events are dropped while full.
pub const SUBSCRIPTION_BUFFER: usize = 256;

// ============================================================================
// Timing
// ============================================================================

/// HTTP client request timeout for REST calls and hub negotiation.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the client pings the hub while connected.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Silence window after which the connection is considered lost.
///
/// Must stay above twice the server's keep-alive (15s) to tolerate one
/// missed ping.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the handshake response after the socket opens.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Reconnect schedule in milliseconds, one entry per attempt.
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];
