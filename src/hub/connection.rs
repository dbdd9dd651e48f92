//! Hub connection handle, subscriptions and the background connection task.
//!
//! # Lifecycle
//!
//! - The first connection attempt either succeeds or leaves the connection
//!   [`ConnectionState::Disconnected`] for good (bad token, server down).
//! - Once connected, a lost socket is retried on the
//!   [`ReconnectPolicy`] schedule; an exhausted schedule or a rejected
//!   token ends in `Disconnected`.
//! - When the task stops, every live [`Subscription`] sees `recv()` return
//!   `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::negotiate::{negotiate, websocket_url};
use super::protocol::{self, HubMessage};
use super::{ConnectionState, HubError, ReconnectPolicy};
use crate::config::Config;
use crate::constants::{
    DEFAULT_KEEP_ALIVE, DEFAULT_SERVER_TIMEOUT, HANDSHAKE_TIMEOUT, HTTP_REQUEST_TIMEOUT,
    SUBSCRIPTION_BUFFER,
};
use crate::ws::{self, Incoming, SocketReader, SocketWriter};

/// Connection parameters for one hub.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// HTTP(S) URL of the hub, e.g. `https://api.example.com/hubs/chat`.
    pub hub_url: String,
    /// Connect the WebSocket directly without the negotiate round-trip.
    pub skip_negotiation: bool,
    /// Schedule used after an established connection is lost.
    pub reconnect: ReconnectPolicy,
    /// Client ping interval. Zero disables pings.
    pub keep_alive: Duration,
    /// Inbound silence that counts as a lost connection. Zero disables.
    pub server_timeout: Duration,
}

impl HubOptions {
    /// Options with default timing for `hub_url`.
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            skip_negotiation: false,
            reconnect: ReconnectPolicy::default(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }

    /// Chat hub options from configuration.
    #[must_use]
    pub fn chat(config: &Config) -> Self {
        Self::from_config(config, config.hub_url())
    }

    /// Notification hub options from configuration.
    #[must_use]
    pub fn notifications(config: &Config) -> Self {
        Self::from_config(config, config.notification_hub_url())
    }

    fn from_config(config: &Config, hub_url: String) -> Self {
        Self {
            hub_url,
            skip_negotiation: config.skip_negotiation,
            reconnect: ReconnectPolicy::new(config.reconnect_delays()),
            keep_alive: config.keep_alive(),
            server_timeout: config.server_timeout(),
        }
    }
}

/// Outgoing fire-and-forget hub call.
#[derive(Debug)]
struct Invocation {
    target: String,
    arguments: Vec<Value>,
}

/// Event handlers keyed by lower-cased event name (hub method names are
/// case-insensitive).
#[derive(Debug, Default)]
struct SubscriptionRegistry {
    next_id: AtomicU64,
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    closed: bool,
    handlers: HashMap<String, Vec<(u64, mpsc::Sender<Vec<Value>>)>>,
}

impl SubscriptionRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, event: &str) -> (u64, mpsc::Receiver<Vec<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut inner = self.lock();
        // A closed registry drops `tx` here so the receiver ends immediately.
        if !inner.closed {
            inner
                .handlers
                .entry(event_key(event))
                .or_default()
                .push((id, tx));
        }
        (id, rx)
    }

    fn remove(&self, event: &str, id: u64) {
        let key = event_key(event);
        let mut inner = self.lock();
        if let Some(list) = inner.handlers.get_mut(&key) {
            list.retain(|(handler_id, _)| *handler_id != id);
            if list.is_empty() {
                inner.handlers.remove(&key);
            }
        }
    }

    /// Deliver `arguments` to every subscriber of `target`.
    ///
    /// Full subscribers lose the event; closed ones are pruned.
    fn dispatch(&self, target: &str, arguments: &[Value]) -> usize {
        let mut inner = self.lock();
        let Some(list) = inner.handlers.get_mut(&event_key(target)) else {
            log::trace!("[Hub] No subscribers for '{}'", target);
            return 0;
        };

        let mut delivered = 0;
        list.retain(|(id, tx)| match tx.try_send(arguments.to_vec()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!(
                    "[Hub] Subscriber {} for '{}' is not keeping up, dropping event",
                    id,
                    target
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    fn count(&self, event: &str) -> usize {
        self.lock()
            .handlers
            .get(&event_key(event))
            .map_or(0, Vec::len)
    }

    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.handlers.clear();
    }
}

fn event_key(event: &str) -> String {
    event.to_ascii_lowercase()
}

/// RAII handle for one event subscription.
///
/// Receives the argument list of every matching hub invocation. Dropping
/// the handle unsubscribes.
pub struct Subscription {
    event: String,
    id: u64,
    rx: mpsc::Receiver<Vec<Value>>,
    registry: Arc<SubscriptionRegistry>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Wait for the next event. `None` once the connection has stopped.
    pub async fn recv(&mut self) -> Option<Vec<Value>> {
        self.rx.recv().await
    }

    /// Take a pending event without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<Value>> {
        self.rx.try_recv().ok()
    }

    /// Event name this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.event, self.id);
    }
}

/// One logical connection to a hub.
///
/// Must be created inside a Tokio runtime. Dropping the handle shuts the
/// background task down and closes the socket.
#[derive(Debug)]
pub struct RealtimeConnection {
    hub_url: String,
    registry: Arc<SubscriptionRegistry>,
    invoke_tx: mpsc::UnboundedSender<Invocation>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl RealtimeConnection {
    /// Start connecting to the hub with `token` as bearer credential.
    ///
    /// Returns immediately; progress is visible through [`Self::state`].
    /// A blank token never connects and stays `Disconnected`.
    #[must_use]
    pub fn connect(options: HubOptions, token: &str) -> Self {
        let registry = Arc::new(SubscriptionRegistry::default());
        let (invoke_tx, invoke_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let hub_url = options.hub_url.clone();

        if token.trim().is_empty() {
            log::warn!("[Hub] {}, staying disconnected", HubError::MissingToken);
            registry.close();
        } else {
            let task = ConnectionTask {
                options,
                token: token.to_string(),
                registry: Arc::clone(&registry),
                state_tx,
                invoke_rx,
                shutdown_rx,
                http: build_http_client(),
            };
            tokio::spawn(task.run());
        }

        Self {
            hub_url,
            registry,
            invoke_tx,
            state_rx,
            shutdown_tx,
        }
    }

    /// Subscribe to a hub event (case-insensitive name).
    #[must_use]
    pub fn subscribe(&self, event: &str) -> Subscription {
        let (id, rx) = self.registry.add(event);
        Subscription {
            event: event.to_string(),
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Number of live subscriptions for `event`.
    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.count(event)
    }

    /// Call a hub method without waiting for a result.
    ///
    /// Dropped (with a debug log) when not connected.
    pub fn invoke(&self, target: &str, arguments: Vec<Value>) {
        self.invoker().invoke(target, arguments);
    }

    /// Cloneable handle for invoking hub methods from other tasks.
    #[must_use]
    pub fn invoker(&self) -> HubInvoker {
        HubInvoker {
            invoke_tx: self.invoke_tx.clone(),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the task stopped first without ever matching.
    pub async fn wait_for_state<F>(&self, predicate: F) -> Option<ConnectionState>
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx.wait_for(predicate).await.ok()?;
        Some(state.clone())
    }

    /// Hub URL this connection targets.
    #[must_use]
    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Stop the background task and close the socket.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Sending half of [`RealtimeConnection::invoke`].
///
/// Invocations are discarded once the connection is dropped.
#[derive(Debug, Clone)]
pub struct HubInvoker {
    invoke_tx: mpsc::UnboundedSender<Invocation>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl HubInvoker {
    /// Fire-and-forget invocation; dropped when not connected.
    pub fn invoke(&self, target: &str, arguments: Vec<Value>) {
        if !self.state_rx.borrow().is_connected() {
            log::debug!("[Hub] Dropping invoke '{}' -- not connected", target);
            return;
        }
        if self
            .invoke_tx
            .send(Invocation {
                target: target.to_string(),
                arguments,
            })
            .is_err()
        {
            log::debug!("[Hub] Dropping invoke '{}' -- connection task gone", target);
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// A socket that completed the handshake.
struct Established {
    writer: SocketWriter,
    reader: SocketReader,
    /// Frames that arrived in the same message as the handshake response.
    backlog: Vec<String>,
}

/// Why the per-socket message loop returned.
enum LoopExit {
    /// Shutdown was requested.
    Shutdown,
    /// Server closed the connection and does not want a reconnect.
    Closed(Option<String>),
    /// Connection lost -- follow the reconnect schedule.
    Lost(String),
}

/// State owned by the background task.
struct ConnectionTask {
    options: HubOptions,
    token: String,
    registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    invoke_rx: mpsc::UnboundedReceiver<Invocation>,
    shutdown_rx: watch::Receiver<bool>,
    http: reqwest::Client,
}

impl ConnectionTask {
    async fn run(mut self) {
        self.set_state(ConnectionState::Connecting);

        let mut established = match self.establish().await {
            Ok(established) => established,
            Err(e) => {
                log::warn!("[Hub] Connection failed: {} (staying disconnected)", e);
                self.finish();
                return;
            }
        };
        log::info!("[Hub] Connected");
        self.set_state(ConnectionState::Connected);

        loop {
            match self.run_message_loop(&mut established).await {
                LoopExit::Shutdown => {
                    log::info!("[Hub] Shutdown requested, connection closed");
                    break;
                }
                LoopExit::Closed(reason) => {
                    log::info!(
                        "[Hub] Server closed the connection: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    );
                    break;
                }
                LoopExit::Lost(reason) => {
                    log::warn!("[Hub] Connection lost: {}", reason);
                    let Some(next) = self.reconnect().await else {
                        break;
                    };
                    established = next;
                    log::info!("[Hub] Reconnected");
                    self.set_state(ConnectionState::Connected);
                }
            }
        }

        self.finish();
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn finish(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.registry.close();
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Negotiate (unless skipped), open the socket and complete the handshake.
    async fn establish(&self) -> Result<Established, HubError> {
        let (hub_url, token, connection_id) = if self.options.skip_negotiation {
            (self.options.hub_url.clone(), self.token.clone(), None)
        } else {
            let endpoint = negotiate(&self.http, &self.options.hub_url, &self.token).await?;
            (endpoint.hub_url, endpoint.token, endpoint.connection_id)
        };

        let url = websocket_url(&hub_url, connection_id.as_deref(), &token)?;
        log::info!("[Hub] Connecting to {}", ws::redact_query(&url));

        let (mut writer, mut reader) = ws::open(&url, &token)
            .await
            .map_err(|e| match ws::rejection_status(&e) {
                Some(status) => HubError::from_status(status, "upgrade"),
                None => HubError::Transport(format!("{e:#}")),
            })?;

        writer
            .send_text(&protocol::handshake_request())
            .await
            .map_err(|e| HubError::Handshake(format!("{e:#}")))?;

        let backlog = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            await_handshake(&mut writer, &mut reader),
        )
        .await
        .map_err(|_elapsed| HubError::Handshake("timed out".to_string()))??;

        Ok(Established {
            writer,
            reader,
            backlog,
        })
    }

    /// Walk the reconnect schedule. `None` means give up.
    async fn reconnect(&mut self) -> Option<Established> {
        let mut attempt = 0usize;
        while let Some(delay) = self.options.reconnect.next_delay(attempt) {
            attempt += 1;
            self.set_state(ConnectionState::Reconnecting {
                attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
                next_retry_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            log::info!(
                "[Hub] Reconnect attempt {} in {}ms",
                attempt,
                delay.as_millis()
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.changed() => return None,
            }
            if self.shutdown_requested() {
                return None;
            }

            match self.establish().await {
                Ok(established) => return Some(established),
                Err(e) if e.is_fatal() => {
                    log::warn!("[Hub] Reconnect refused: {}", e);
                    return None;
                }
                Err(e) => log::warn!("[Hub] Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        log::warn!(
            "[Hub] Gave up after {} reconnect attempts",
            self.options.reconnect.max_attempts()
        );
        None
    }

    /// Route frames for one socket until it is lost, closed or shut down.
    async fn run_message_loop(&mut self, conn: &mut Established) -> LoopExit {
        for frame in std::mem::take(&mut conn.backlog) {
            if let Some(exit) = handle_frame(&self.registry, &frame) {
                return exit;
            }
        }

        let keep_alive = self.options.keep_alive;
        let mut ping = (!keep_alive.is_zero()).then(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let server_timeout = self.options.server_timeout;
        let mut last_received = Instant::now();

        loop {
            let deadline = (!server_timeout.is_zero()).then(|| last_received + server_timeout);

            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    let _ = conn.writer.close().await;
                    return LoopExit::Shutdown;
                }

                msg = conn.reader.recv() => {
                    last_received = Instant::now();
                    match msg {
                        Some(Ok(Incoming::Text(text))) => {
                            for frame in protocol::split_frames(&text) {
                                if let Some(exit) = handle_frame(&self.registry, frame) {
                                    return exit;
                                }
                            }
                        }
                        Some(Ok(Incoming::Ping(data))) => {
                            let _ = conn.writer.send_pong(data).await;
                        }
                        Some(Ok(Incoming::Close { code, reason })) => {
                            return LoopExit::Lost(format!("socket closed ({code} {reason})"));
                        }
                        Some(Err(e)) => return LoopExit::Lost(format!("{e:#}")),
                        None => return LoopExit::Lost("stream ended".to_string()),
                    }
                }

                Some(invocation) = self.invoke_rx.recv() => {
                    match protocol::encode_invocation(&invocation.target, &invocation.arguments) {
                        Ok(frame) => {
                            if let Err(e) = conn.writer.send_text(&frame).await {
                                return LoopExit::Lost(format!("{e:#}"));
                            }
                            log::trace!("[Hub] Sent invoke '{}'", invocation.target);
                        }
                        Err(e) => log::warn!("[Hub] Could not encode invoke '{}': {}", invocation.target, e),
                    }
                }

                () = tick(ping.as_mut()) => {
                    if let Err(e) = conn.writer.send_text(&protocol::ping_frame()).await {
                        return LoopExit::Lost(format!("{e:#}"));
                    }
                }

                () = sleep_until(deadline) => {
                    return LoopExit::Lost(format!(
                        "no message from server in {}s",
                        server_timeout.as_secs()
                    ));
                }
            }
        }
    }
}

/// Read until the handshake response; returns frames that followed it.
async fn await_handshake(
    writer: &mut SocketWriter,
    reader: &mut SocketReader,
) -> Result<Vec<String>, HubError> {
    while let Some(msg) = reader.recv().await {
        match msg {
            Ok(Incoming::Text(text)) => {
                let mut frames = protocol::split_frames(&text);
                let Some(first) = frames.next() else {
                    continue;
                };
                protocol::parse_handshake_response(first).map_err(HubError::Handshake)?;
                log::debug!("[Hub] Handshake accepted");
                return Ok(frames.map(str::to_string).collect());
            }
            Ok(Incoming::Ping(data)) => {
                let _ = writer.send_pong(data).await;
            }
            Ok(Incoming::Close { code, reason }) => {
                return Err(HubError::Handshake(format!(
                    "closed during handshake ({code} {reason})"
                )));
            }
            Err(e) => return Err(HubError::Transport(format!("{e:#}"))),
        }
    }
    Err(HubError::Handshake("stream ended during handshake".to_string()))
}

/// Apply one decoded frame. `Some` ends the message loop.
fn handle_frame(registry: &SubscriptionRegistry, frame: &str) -> Option<LoopExit> {
    match protocol::parse_message(frame) {
        Ok(HubMessage::Invocation { target, arguments }) => {
            let delivered = registry.dispatch(&target, &arguments);
            log::debug!("[Hub] '{}' delivered to {} subscriber(s)", target, delivered);
            None
        }
        Ok(HubMessage::Ping) => None,
        Ok(HubMessage::Completion {
            invocation_id,
            error,
        }) => {
            log::debug!(
                "[Hub] Completion for {} (error={:?})",
                invocation_id,
                error
            );
            None
        }
        Ok(HubMessage::Close {
            error,
            allow_reconnect,
        }) => Some(if allow_reconnect {
            LoopExit::Lost(error.unwrap_or_else(|| "server requested reconnect".to_string()))
        } else {
            LoopExit::Closed(error)
        }),
        Ok(HubMessage::Other(kind)) => {
            log::trace!("[Hub] Ignoring message type {}", kind);
            None
        }
        Err(e) => {
            let preview: String = frame.chars().take(100).collect();
            log::warn!("[Hub] Failed to parse frame ({}): {}", e, preview);
            None
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
