//! SignalR JSON hub protocol framing.
//!
//! Every frame is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A single WebSocket text message may carry several frames.
//!
//! | `type` | Message      | Handling                               |
//! |--------|--------------|----------------------------------------|
//! | 1      | Invocation   | Routed to subscribers by `target`      |
//! | 3      | Completion   | Logged (client only sends fire-and-forget) |
//! | 6      | Ping         | Refreshes the server-timeout window    |
//! | 7      | Close        | Ends the connection, maybe reconnects  |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::RECORD_SEPARATOR;

const TYPE_INVOCATION: u8 = 1;
const TYPE_STREAM_ITEM: u8 = 2;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// Decoded hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server calling a client-side event handler.
    Invocation {
        /// Event name, e.g. `ReceiveMessage`.
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
    },
    /// Result of a client invocation that asked for one.
    Completion {
        /// Invocation the result belongs to.
        invocation_id: String,
        /// Server-side error, if the call failed.
        error: Option<String>,
    },
    /// Keep-alive.
    Ping,
    /// Server is closing the connection.
    Close {
        /// Reason given by the server.
        error: Option<String>,
        /// Whether the client may reconnect.
        allow_reconnect: bool,
    },
    /// Stream items, stream invocations, cancellations and future types.
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OutgoingInvocation<'a> {
    #[serde(rename = "type")]
    kind: u8,
    target: &'a str,
    arguments: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Handshake request selecting the JSON protocol, version 1.
#[must_use]
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

/// Validate the server's handshake response frame.
///
/// `{}` accepts; `{"error": "..."}` carries the server's refusal.
pub fn parse_handshake_response(frame: &str) -> Result<(), String> {
    let response: HandshakeResponse =
        serde_json::from_str(frame).map_err(|e| format!("invalid handshake response: {e}"))?;
    match response.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Split a text message into complete frames.
///
/// Trailing bytes without a terminating separator are discarded with a
/// warning; the server never splits a frame across messages.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    let (complete, partial) = match text.rfind(RECORD_SEPARATOR) {
        Some(idx) => (&text[..idx], &text[idx + RECORD_SEPARATOR.len_utf8()..]),
        None => ("", text),
    };
    if !partial.trim().is_empty() {
        log::warn!(
            "[Hub] Dropping unterminated frame ({} bytes)",
            partial.len()
        );
    }
    complete
        .split(RECORD_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
}

/// Decode a single frame (without separator).
pub fn parse_message(frame: &str) -> Result<HubMessage, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(frame)?;
    let message = match raw.kind {
        TYPE_INVOCATION => match raw.target {
            Some(target) => HubMessage::Invocation {
                target,
                arguments: raw.arguments,
            },
            None => HubMessage::Other(TYPE_INVOCATION),
        },
        TYPE_COMPLETION => HubMessage::Completion {
            invocation_id: raw.invocation_id.unwrap_or_default(),
            error: raw.error,
        },
        TYPE_PING => HubMessage::Ping,
        TYPE_CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect.unwrap_or(false),
        },
        TYPE_STREAM_ITEM => HubMessage::Other(TYPE_STREAM_ITEM),
        other => HubMessage::Other(other),
    };
    Ok(message)
}

/// Encode a non-blocking invocation (no result expected).
pub fn encode_invocation(target: &str, arguments: &[Value]) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(&OutgoingInvocation {
        kind: TYPE_INVOCATION,
        target,
        arguments,
    })?;
    Ok(format!("{body}{RECORD_SEPARATOR}"))
}

/// Keep-alive frame.
#[must_use]
pub fn ping_frame() -> String {
    format!(r#"{{"type":{TYPE_PING}}}{RECORD_SEPARATOR}"#)
}
