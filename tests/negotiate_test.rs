//! Tests for the negotiate round-trip.
//!
//! The HTTP half runs against wiremock. The end-to-end half uses a small
//! local server that answers `POST .../negotiate` with plain HTTP and
//! upgrades everything else to a SignalR WebSocket, so the URL the client
//! finally dials can be inspected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pharmadesk_realtime::hub::negotiate::negotiate;
use pharmadesk_realtime::hub::{ConnectionState, HubError, HubOptions, ReconnectPolicy};
use pharmadesk_realtime::RealtimeConnection;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RS: char = '\u{1e}';
const WAIT: Duration = Duration::from_secs(5);

fn websocket_offer(connection_token: &str) -> Value {
    json!({
        "negotiateVersion": 1,
        "connectionId": "conn-id",
        "connectionToken": connection_token,
        "availableTransports": [
            {"transport": "ServerSentEvents", "transferFormats": ["Text"]},
            {"transport": "WebSockets", "transferFormats": ["Text", "Binary"]}
        ]
    })
}

// ============================================================================
// negotiate() against wiremock
// ============================================================================

#[tokio::test]
async fn test_negotiate_returns_connection_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .and(query_param("negotiateVersion", "1"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(websocket_offer("ct-1")))
        .expect(1)
        .mount(&server)
        .await;

    let hub_url = format!("{}/hubs/chat", server.uri());
    let endpoint = negotiate(&reqwest::Client::new(), &hub_url, "tok")
        .await
        .unwrap();

    assert_eq!(endpoint.hub_url, hub_url);
    assert_eq!(endpoint.token, "tok");
    assert_eq!(endpoint.connection_id.as_deref(), Some("ct-1"));
}

#[tokio::test]
async fn test_negotiate_rejected_token_is_fatal() {
    for status in [401u16, 403] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hubs/chat/negotiate"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = negotiate(
            &reqwest::Client::new(),
            &format!("{}/hubs/chat", server.uri()),
            "expired",
        )
        .await
        .unwrap_err();

        assert_eq!(err, HubError::Unauthorized(status));
        assert!(err.is_fatal());
    }
}

#[tokio::test]
async fn test_negotiate_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = negotiate(
        &reqwest::Client::new(),
        &format!("{}/hubs/chat", server.uri()),
        "tok",
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HubError::Negotiation(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_negotiate_without_websockets_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "negotiateVersion": 1,
            "connectionToken": "ct-1",
            "availableTransports": [
                {"transport": "LongPolling", "transferFormats": ["Text", "Binary"]}
            ]
        })))
        .mount(&server)
        .await;

    let err = negotiate(
        &reqwest::Client::new(),
        &format!("{}/hubs/chat", server.uri()),
        "tok",
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::TransportUnavailable);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_negotiate_error_field_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": "Hub is draining"})),
        )
        .mount(&server)
        .await;

    let err = negotiate(
        &reqwest::Client::new(),
        &format!("{}/hubs/chat", server.uri()),
        "tok",
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::Negotiation("Hub is draining".to_string()));
}

#[tokio::test]
async fn test_negotiate_follows_redirect_with_new_token() {
    let server = MockServer::start().await;
    let redirect = format!("{}/edge/hubs/chat", server.uri());
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": redirect.clone(),
            "accessToken": "edge-token"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/edge/hubs/chat/negotiate"))
        .and(header("Authorization", "Bearer edge-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(websocket_offer("ct-edge")))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = negotiate(
        &reqwest::Client::new(),
        &format!("{}/hubs/chat", server.uri()),
        "tok",
    )
    .await
    .unwrap();

    assert_eq!(endpoint.hub_url, redirect);
    assert_eq!(endpoint.token, "edge-token");
    assert_eq!(endpoint.connection_id.as_deref(), Some("ct-edge"));
}

#[tokio::test]
async fn test_negotiate_stops_after_one_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": format!("{}/hubs/chat", server.uri())
        })))
        .expect(2)
        .mount(&server)
        .await;

    let err = negotiate(
        &reqwest::Client::new(),
        &format!("{}/hubs/chat", server.uri()),
        "tok",
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::Negotiation("too many redirects".to_string()));
}

#[tokio::test]
async fn test_rejected_negotiate_leaves_connection_disconnected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hubs/chat/negotiate"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut options = HubOptions::new(format!("{}/hubs/chat", server.uri()));
    options.reconnect = ReconnectPolicy::new(vec![Duration::ZERO, Duration::from_millis(50)]);
    let connection = RealtimeConnection::connect(options, "expired");

    // Subscriptions end once the background task gives up.
    let mut events = connection.subscribe("ReceiveMessage");
    let ended = tokio::time::timeout(WAIT, events.recv()).await.unwrap();
    assert!(ended.is_none());

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// ============================================================================
// Negotiating hub: plain HTTP negotiate plus WebSocket upgrade on one port
// ============================================================================

/// Negotiate request seen by the local hub.
#[derive(Debug)]
struct NegotiateSeen {
    path: String,
    authorization: Option<String>,
}

/// Socket that completed the SignalR handshake.
struct HubClient {
    ws: WebSocketStream<TcpStream>,
    uri: String,
    authorization: Option<String>,
}

/// Local hub on a random port.
///
/// `/hubs/chat/negotiate` redirects to `/edge/hubs/chat` with the token
/// `edge-token`; `/edge/hubs/chat/negotiate` hands out `ct-1`, `ct-2`, ...
async fn start_negotiating_hub() -> (
    String,
    mpsc::UnboundedReceiver<NegotiateSeen>,
    mpsc::UnboundedReceiver<HubClient>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (negotiate_tx, negotiate_rx) = mpsc::unbounded_channel();
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let issued = Arc::new(AtomicUsize::new(0));

    let hub_base = base.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let negotiate_tx = negotiate_tx.clone();
            let client_tx = client_tx.clone();
            let issued = Arc::clone(&issued);
            let base = hub_base.clone();
            tokio::spawn(async move {
                if is_post(&stream).await {
                    answer_negotiate(stream, &base, &issued, &negotiate_tx).await;
                } else {
                    accept_hub_client(stream, &client_tx).await;
                }
            });
        }
    });

    (format!("{base}/hubs/chat"), negotiate_rx, client_rx)
}

async fn is_post(stream: &TcpStream) -> bool {
    let mut head = [0u8; 4];
    loop {
        match stream.peek(&mut head).await {
            Ok(n) if n >= head.len() => return &head == b"POST",
            Ok(0) | Err(_) => return false,
            Ok(_) => tokio::task::yield_now().await,
        }
    }
}

async fn answer_negotiate(
    mut stream: TcpStream,
    base: &str,
    issued: &AtomicUsize,
    seen: &mpsc::UnboundedSender<NegotiateSeen>,
) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&request).to_string();

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();
    let authorization = request.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("authorization")
            .then(|| value.trim().to_string())
    });

    let body = if path.starts_with("/hubs/chat/negotiate") {
        json!({"url": format!("{base}/edge/hubs/chat"), "accessToken": "edge-token"})
    } else {
        let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
        websocket_offer(&format!("ct-{n}"))
    };
    let _ = seen.send(NegotiateSeen {
        path,
        authorization,
    });

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn accept_hub_client(stream: TcpStream, clients: &mpsc::UnboundedSender<HubClient>) {
    let mut uri = String::new();
    let mut authorization = None;
    let callback = |request: &Request, response: Response| {
        uri = request.uri().to_string();
        authorization = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let Some(Ok(WsFrame::Text(_handshake))) = ws.next().await else {
        return;
    };
    ws.send(WsFrame::Text(format!("{{}}{RS}"))).await.unwrap();
    let _ = clients.send(HubClient {
        ws,
        uri,
        authorization,
    });
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("nothing arrived in time")
        .expect("hub stopped")
}

fn negotiated_options(url: &str) -> HubOptions {
    let mut options = HubOptions::new(url);
    options.keep_alive = Duration::ZERO;
    options.reconnect = ReconnectPolicy::new(vec![Duration::ZERO, Duration::from_millis(50)]);
    options
}

#[tokio::test]
async fn test_redirected_token_and_connection_token_reach_websocket_url() {
    let (url, mut negotiations, mut clients) = start_negotiating_hub().await;
    let connection = RealtimeConnection::connect(negotiated_options(&url), "tok");

    let first = next(&mut negotiations).await;
    assert_eq!(first.path, "/hubs/chat/negotiate?negotiateVersion=1");
    assert_eq!(first.authorization.as_deref(), Some("Bearer tok"));

    let second = next(&mut negotiations).await;
    assert_eq!(second.path, "/edge/hubs/chat/negotiate?negotiateVersion=1");
    assert_eq!(second.authorization.as_deref(), Some("Bearer edge-token"));

    let client = next(&mut clients).await;
    assert_eq!(client.uri, "/edge/hubs/chat?id=ct-1&access_token=edge-token");
    assert_eq!(client.authorization.as_deref(), Some("Bearer edge-token"));

    let mut state = connection.state_changes();
    tokio::time::timeout(WAIT, state.wait_for(ConnectionState::is_connected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_reconnect_negotiates_a_fresh_connection_token() {
    let (url, mut negotiations, mut clients) = start_negotiating_hub().await;
    let connection = RealtimeConnection::connect(negotiated_options(&url), "tok");

    let mut first = next(&mut clients).await;
    assert!(first.uri.contains("id=ct-1"));
    first.ws.close(None).await.unwrap();

    let second = next(&mut clients).await;
    assert!(second.uri.contains("id=ct-2"));

    // Two negotiations per connection: the entry hub, then the redirect.
    for _ in 0..4 {
        next(&mut negotiations).await;
    }

    let mut state = connection.state_changes();
    tokio::time::timeout(WAIT, state.wait_for(ConnectionState::is_connected))
        .await
        .unwrap()
        .unwrap();
}
