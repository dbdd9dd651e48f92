//! WebSocket transport for the hubs.
//!
//! The only module that talks to `tokio-tungstenite`. [`open`] performs the
//! upgrade with the bearer token attached and hands back a
//! ([`SocketWriter`], [`SocketReader`]) pair for the connection task's
//! `tokio::select!` loop. The reader only surfaces what the SignalR JSON
//! protocol needs: text frames, pings and the close frame.
//!
//! An upgrade refused with an HTTP status (`401` for a bad token) is
//! recognised afterwards with [`rejection_status`].

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Frame read from the hub socket.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Text frame carrying one or more hub messages.
    Text(String),
    /// Transport-level ping; answer with [`SocketWriter::send_pong`].
    Ping(Vec<u8>),
    /// Peer closed the socket.
    Close {
        /// Close code (1005 when the peer sent none).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Sending half of a hub socket.
#[derive(Debug)]
pub struct SocketWriter {
    sink: SplitSink<Socket, Message>,
}

impl SocketWriter {
    /// Send one text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .context("Failed to send text frame")
    }

    /// Answer a transport ping.
    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Pong(payload))
            .await
            .context("Failed to send pong")
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("Failed to close socket")
    }
}

/// Receiving half of a hub socket.
#[derive(Debug)]
pub struct SocketReader {
    stream: SplitStream<Socket>,
}

impl SocketReader {
    /// Next frame the hub cares about; `None` when the stream ends.
    ///
    /// Binary frames, pongs and raw frames are dropped here.
    pub async fn recv(&mut self) -> Option<Result<Incoming>> {
        while let Some(message) = self.stream.next().await {
            let incoming = match message {
                Ok(Message::Text(text)) => Incoming::Text(text),
                Ok(Message::Ping(payload)) => Incoming::Ping(payload),
                Ok(Message::Close(frame)) => match frame {
                    Some(frame) => Incoming::Close {
                        code: frame.code.into(),
                        reason: frame.reason.into_owned(),
                    },
                    None => Incoming::Close {
                        code: 1005,
                        reason: String::new(),
                    },
                },
                Ok(Message::Binary(payload)) => {
                    log::trace!("[Hub] Ignoring {}-byte binary frame", payload.len());
                    continue;
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(anyhow::Error::new(e).context("Socket read failed"))),
            };
            return Some(Ok(incoming));
        }
        None
    }
}

/// Open a hub socket at `url`, sending `bearer` as the `Authorization`
/// header alongside the `access_token` query parameter already in `url`.
pub async fn open(url: &str, bearer: &str) -> Result<(SocketWriter, SocketReader)> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("Invalid hub URL: {}", redact_query(url)))?;
    let authorization = HeaderValue::from_str(&format!("Bearer {bearer}"))
        .context("Token is not a valid header value")?;
    request.headers_mut().insert("Authorization", authorization);

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("Upgrade to {} failed", redact_query(url)))?;
    let (sink, stream) = socket.split();
    Ok((SocketWriter { sink }, SocketReader { stream }))
}

/// HTTP status of a refused upgrade, if that is what `err` is.
#[must_use]
pub fn rejection_status(err: &anyhow::Error) -> Option<u16> {
    err.chain().find_map(|cause| match cause.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Http(response)) => Some(response.status().as_u16()),
        _ => None,
    })
}

/// `http(s)://` to `ws(s)://`; other schemes pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Strip the query string so tokens never end up in logs.
#[must_use]
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
