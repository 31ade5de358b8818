// Push-channel connection with auto-reconnect.
//
// One logical connection per topic. The background loop owns the socket
// and drives the `Idle → Connecting → Connected` state machine, retrying
// on a fixed delay schedule after any disconnect until the handle is
// closed. Inbound event frames fan out through a broadcast channel;
// outbound invocations (group membership) ride the same socket.
//
// Teardown is cooperative: `close()` sets the cancellation marker
// immediately but never aborts a handshake that is already in flight.
// The loop awaits the attempt, observes the marker once it settles, and
// finishes the stop itself. That keeps rapid open/close/open sequences
// from ever leaking a live connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::Error;
use crate::session::TokenProvider;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const INVOKE_CHANNEL_CAPACITY: usize = 32;

/// Delays between reconnect attempts after a disconnect: immediately,
/// then 2s/5s/10s/30s, repeating the final interval indefinitely.
pub const RECONNECT_SCHEDULE: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Delay before reconnect attempt number `attempt` (zero-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let idx = usize::try_from(attempt)
        .unwrap_or(usize::MAX)
        .min(RECONNECT_SCHEDULE.len() - 1);
    RECONNECT_SCHEDULE[idx]
}

// ── Topic ────────────────────────────────────────────────────────────

/// A named logical push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Notifications,
    OrderTracking,
    StockAlerts,
}

impl Topic {
    pub const ALL: [Self; 3] = [Self::Notifications, Self::OrderTracking, Self::StockAlerts];

    /// Endpoint path below the configured channel base.
    pub fn path(self) -> &'static str {
        match self {
            Self::Notifications => "/notifications",
            Self::OrderTracking => "/order-tracking",
            Self::StockAlerts => "/stock-alerts",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::OrderTracking => "order-tracking",
            Self::StockAlerts => "stock-alerts",
        }
    }

    /// Stock alerts are only streamed to administrators.
    pub fn admin_only(self) -> bool {
        matches!(self, Self::StockAlerts)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── State & events ───────────────────────────────────────────────────

/// Connection state observable through [`ChannelHandle::state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Closed,
}

/// A parsed inbound event. Transient: routed on arrival, never stored.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub topic: Topic,
    pub name: String,
    pub payload: serde_json::Value,
}

/// Outbound invocation frame: `{"invoke": "...", "args": [...]}`.
#[derive(Debug, Serialize)]
struct Invocation {
    invoke: String,
    args: Vec<serde_json::Value>,
}

/// Inbound event frame: `{"event": "...", "payload": {...}}`.
#[derive(Debug, Deserialize)]
struct EventFrame {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

// ── ChannelHandle ────────────────────────────────────────────────────

/// Handle to one topic's connection loop.
///
/// Dropping the handle tears the connection down the same way
/// [`close`](Self::close) does, so a connection can never outlive its
/// owner.
pub struct ChannelHandle {
    topic: Topic,
    event_rx: broadcast::Receiver<Arc<ChannelEvent>>,
    state_rx: watch::Receiver<ChannelState>,
    invoke_tx: mpsc::Sender<Invocation>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Spawn the connection loop for `topic` against `endpoint`.
    ///
    /// Returns immediately; the first connect attempt happens in the
    /// background. The token provider is consulted on every attempt,
    /// so a token renewed mid-reconnect is used on the next handshake.
    pub fn open(
        topic: Topic,
        endpoint: Url,
        tokens: Arc<dyn TokenProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (invoke_tx, invoke_rx) = mpsc::channel(INVOKE_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            channel_loop(topic, endpoint, tokens, event_tx, state_tx, invoke_rx, task_cancel)
                .await;
        });

        Self {
            topic,
            event_rx,
            state_rx,
            invoke_tx,
            cancel,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// New broadcast receiver for this topic's events. A consumer that
    /// falls behind observes [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChannelEvent>> {
        self.event_rx.resubscribe()
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Snapshot of the current connection state.
    pub fn current_state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Send a remote invocation over this channel, best effort.
    ///
    /// A silent no-op unless the channel is currently `Connected`:
    /// invocations are scope-narrowing hints, not correctness-critical
    /// calls, so nothing is queued or retried.
    pub fn invoke(&self, target: &str, args: Vec<serde_json::Value>) {
        if *self.state_rx.borrow() != ChannelState::Connected {
            debug!(topic = %self.topic, target, "channel not connected, dropping invocation");
            return;
        }
        let invocation = Invocation {
            invoke: target.to_owned(),
            args,
        };
        if self.invoke_tx.try_send(invocation).is_err() {
            debug!(topic = %self.topic, target, "invocation queue full, dropping");
        }
    }

    /// Request teardown. Sets the cancelled marker immediately; the loop
    /// finishes the stop as soon as any in-flight attempt settles.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("topic", &self.topic)
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

// ── Background connection loop ───────────────────────────────────────

/// Main loop: connect → read → on disconnect, wait per schedule → retry.
async fn channel_loop(
    topic: Topic,
    endpoint: Url,
    tokens: Arc<dyn TokenProvider>,
    event_tx: broadcast::Sender<Arc<ChannelEvent>>,
    state_tx: watch::Sender<ChannelState>,
    mut invoke_rx: mpsc::Receiver<Invocation>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    state_tx.send_replace(ChannelState::Connecting);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match connect(&endpoint, tokens.as_ref()).await {
            Ok(ws) => {
                if cancel.is_cancelled() {
                    // Teardown raced the handshake. The stop was deferred
                    // until the attempt settled; finish it now.
                    close_quietly(ws).await;
                    break;
                }

                info!(topic = %topic, "channel connected");
                attempt = 0;
                state_tx.send_replace(ChannelState::Connected);

                match read_loop(ws, topic, &event_tx, &mut invoke_rx, &cancel).await {
                    Ok(()) => info!(topic = %topic, "channel disconnected"),
                    Err(e) => warn!(topic = %topic, error = %e, "channel stream error"),
                }

                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    break;
                }
                // Never fatal to the host; retried per the schedule.
                warn!(topic = %topic, error = %e, attempt, "channel connect failed");
            }
        }

        let delay = reconnect_delay(attempt);
        state_tx.send_replace(ChannelState::Reconnecting { attempt });
        debug!(
            topic = %topic,
            delay_ms = delay.as_millis() as u64,
            attempt,
            "waiting before reconnect"
        );
        attempt = attempt.saturating_add(1);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ChannelState::Closed);
    debug!(topic = %topic, "channel loop exiting");
}

/// Establish a single connection, authenticating with the token that is
/// current at this moment.
async fn connect(endpoint: &Url, tokens: &dyn TokenProvider) -> Result<WsStream, Error> {
    debug!(url = %endpoint, "connecting channel");

    let uri: tungstenite::http::Uri = endpoint
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::ChannelConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = tokens.access_token() {
        request = request.with_header(
            "Authorization",
            format!("Bearer {}", token.expose_secret()),
        );
    }

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::ChannelConnect(e.to_string()))?;

    Ok(ws)
}

/// Close a socket whose handshake settled after teardown was requested.
async fn close_quietly(mut ws: WsStream) {
    let _ = ws.close(None).await;
}

/// Pump one established connection: inbound frames out to the broadcast
/// channel, queued invocations out over the socket.
async fn read_loop(
    ws: WsStream,
    topic: Topic,
    event_tx: &broadcast::Sender<Arc<ChannelEvent>>,
    invoke_rx: &mut mpsc::Receiver<Invocation>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    // Invocations are scoped to a single connection; drop anything that
    // was queued while the socket was down.
    while invoke_rx.try_recv().is_ok() {}

    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            invocation = invoke_rx.recv() => {
                let Some(invocation) = invocation else {
                    // Every sender dropped: the handle is gone.
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                };
                match serde_json::to_string(&invocation) {
                    Ok(frame) => {
                        // Best effort by design; a broken socket surfaces
                        // on the read side.
                        if write.send(Message::Text(frame.into())).await.is_err() {
                            debug!(topic = %topic, "failed to send invocation");
                        }
                    }
                    Err(e) => debug!(topic = %topic, error = %e, "unserializable invocation"),
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        parse_and_broadcast(topic, &text, event_tx);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        trace!(topic = %topic, "channel ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(topic = %topic, code = %cf.code, reason = %cf.reason, "channel close frame");
                        } else {
                            info!(topic = %topic, "channel close frame (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::ChannelConnect(e.to_string()));
                    }
                    None => {
                        info!(topic = %topic, "channel stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, raw frames -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse one text frame and broadcast the event inside. A frame that
/// does not match the event shape is logged and skipped; it never takes
/// the connection down.
fn parse_and_broadcast(
    topic: Topic,
    text: &str,
    event_tx: &broadcast::Sender<Arc<ChannelEvent>>,
) {
    let frame: EventFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(topic = %topic, error = %e, "discarding unparseable channel frame");
            return;
        }
    };

    // Send errors just mean no subscriber is listening right now.
    let _ = event_tx.send(Arc::new(ChannelEvent {
        topic,
        name: frame.event,
        payload: frame.payload,
    }));
}

// ── Tests ────────────────────────────────────────────────────────────
