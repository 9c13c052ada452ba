//! WebSocket connection to a robot's command channel.
//!
//! # Architecture
//!
//! ```text
//!  caller tasks                       reader task (one per transport)
//!  ────────────                       ───────────────────────────────
//!  send_and_await ──► registry ◄───── dispatch(envelope)
//!        │                                   ▲
//!        ▼                                   │
//!  writer (tokio Mutex<SplitSink>)     SplitStream ◄── robot
//!        │
//!        └──────────────────────────────────────────► robot
//! ```
//!
//! - The WebSocket is split into a sink and a stream.  Writes from any number
//!   of tasks are serialised by a `tokio::sync::Mutex` around the sink.
//! - Exactly one reader task owns the stream.  It decodes each frame and hands
//!   the envelope to the [`HandlerRegistry`].
//! - Every transport gets an *epoch* number.  A reader only tears down the
//!   connection state if its epoch is still the current one, so a reader left
//!   over from an earlier connection can never disconnect a newer one.
//! - `connect` and `shutdown` are serialised by a lifecycle mutex, so two
//!   concurrent `connect` calls cannot interleave their teardown and setup.
//!
//! Outbound envelopes are written as text frames (`base64 + "&"`).  Inbound
//! text and binary frames are both accepted.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use robot_core::{
    decode_envelope, decode_frame, encode_frame, CommandId, CorrelationToken, Device, Envelope,
    TokenAllocator, DEFAULT_CHANNEL_PORT,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use crate::application::dispatcher::{
    DeliveryLimit, EventCallback, HandlerRegistry, SubscriptionId,
};
use crate::domain::{ChannelError, RequestOutcome};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// How long an orderly close may take before the transport is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`RobotConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Transport {
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    reader: JoinHandle<()>,
    epoch: u64,
    peer: String,
}

struct Shared {
    registry: HandlerRegistry,
    tokens: TokenAllocator,
    /// Never held across an `.await`.
    transport: Mutex<Option<Transport>>,
    state: watch::Sender<ConnectionState>,
    lifecycle: tokio::sync::Mutex<()>,
    epochs: AtomicU64,
}

impl Shared {
    fn transport(&self) -> MutexGuard<'_, Option<Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Called by a reader task when its stream ends.
    fn reader_exited(&self, epoch: u64) {
        let mut slot = self.transport();
        if !slot.as_ref().is_some_and(|t| t.epoch == epoch) {
            debug!(epoch, "stale reader exited");
            return;
        }
        let transport = slot.take();
        self.set_state(ConnectionState::Disconnected);
        drop(slot);

        let failed = self.registry.fail_all_pending();
        if let Some(t) = transport {
            info!(peer = %t.peer, epoch, failed, "connection to robot lost");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(transport) = self.transport().take() {
            transport.reader.abort();
        }
    }
}

// ── RobotConnection ───────────────────────────────────────────────────────────

/// Client side of a robot's command channel.
///
/// Cloning is cheap; all clones share one transport, one handler registry and
/// one token allocator.
#[derive(Clone)]
pub struct RobotConnection {
    shared: Arc<Shared>,
}

impl Default for RobotConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotConnection {
    /// Creates a disconnected channel.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                registry: HandlerRegistry::new(),
                tokens: TokenAllocator::new(),
                transport: Mutex::new(None),
                state,
                lifecycle: tokio::sync::Mutex::new(()),
                epochs: AtomicU64::new(0),
            }),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Opens the command channel at `ws://address:port`.
    ///
    /// Any live transport is closed first: its reader is stopped and every
    /// request still waiting on it completes with
    /// [`RequestOutcome::ConnectionLost`].  Subscriptions are kept.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::ConnectTimeout`] if the handshake does not finish
    ///   within `timeout`.
    /// - [`ChannelError::ConnectRefused`] for any other connection failure.
    pub async fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.teardown().await;

        let url = channel_url(address, port);
        self.shared.set_state(ConnectionState::Connecting);
        info!(%url, "connecting to robot");

        let ws = match time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                warn!(%url, "connection refused: {e}");
                return Err(ChannelError::ConnectRefused {
                    address: url,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                warn!(%url, ?timeout, "connection attempt timed out");
                return Err(ChannelError::ConnectTimeout {
                    address: url,
                    timeout,
                });
            }
        };

        let (sink, source) = ws.split();
        let epoch = self.shared.epochs.fetch_add(1, Ordering::Relaxed) + 1;

        // The slot stays locked until the transport is recorded, so a reader
        // that exits immediately still finds its own epoch.
        {
            let mut slot = self.shared.transport();
            let reader = tokio::spawn(read_loop(Arc::downgrade(&self.shared), source, epoch));
            *slot = Some(Transport {
                writer: Arc::new(tokio::sync::Mutex::new(sink)),
                reader,
                epoch,
                peer: url.clone(),
            });
            self.shared.set_state(ConnectionState::Connected);
        }

        info!(%url, epoch, "connected to robot");
        Ok(())
    }

    /// Connects to a discovered device on its advertised port, or on
    /// [`DEFAULT_CHANNEL_PORT`] if it advertised none.
    pub async fn connect_device(&self, device: &Device, timeout: Duration) -> Result<(), ChannelError> {
        let port = if device.port == 0 {
            DEFAULT_CHANNEL_PORT
        } else {
            device.port
        };
        self.connect(&device.address.to_string(), port, timeout).await
    }

    /// Closes the transport and drops every registration.  Safe to call
    /// repeatedly.
    ///
    /// The token allocator keeps counting, so a request abandoned before the
    /// shutdown can never share a token with one sent after it.
    pub async fn shutdown(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.teardown().await;
        self.shared.registry.clear();
        debug!(next_token = self.shared.tokens.current(), "channel shut down");
    }

    /// Stops the current transport, if any.  Caller holds the lifecycle lock.
    async fn teardown(&self) {
        let transport = self.shared.transport().take();
        if let Some(Transport {
            writer,
            reader,
            epoch,
            peer,
        }) = transport
        {
            info!(%peer, epoch, "closing transport");
            let closed = time::timeout(CLOSE_TIMEOUT, async {
                writer.lock().await.close().await
            })
            .await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(epoch, "close handshake failed: {e}"),
                Err(_) => debug!(epoch, "close handshake timed out"),
            }
            reader.abort();
            let _ = reader.await;
        }

        let failed = self.shared.registry.fail_all_pending();
        if failed > 0 {
            debug!(failed, "requests failed by teardown");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    fn writer(&self) -> Result<Arc<tokio::sync::Mutex<WsSink>>, ChannelError> {
        self.shared
            .transport()
            .as_ref()
            .map(|t| Arc::clone(&t.writer))
            .ok_or(ChannelError::NotConnected)
    }

    async fn write(
        writer: &tokio::sync::Mutex<WsSink>,
        envelope: &Envelope,
    ) -> Result<(), ChannelError> {
        let frame = encode_frame(envelope)?;
        writer
            .lock()
            .await
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        trace!(
            command = envelope.command,
            token = %envelope.token,
            bytes = envelope.payload.len(),
            "envelope sent"
        );
        Ok(())
    }

    /// Sends `payload` under `command` with token `"0"`; no reply is awaited.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotConnected`] without a transport,
    /// [`ChannelError::Transport`] if the write fails.
    pub async fn send_fire_and_forget(
        &self,
        command: CommandId,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let writer = self.writer()?;
        Self::write(&writer, &Envelope::fire_and_forget(command, payload.to_vec())).await
    }

    /// Sends a correlated request and waits up to `timeout` for its reply.
    ///
    /// The outcome is `Success`, `Unsupported`, `Timeout` or
    /// `ConnectionLost`.  Whatever happens, including the caller dropping this
    /// future, the request's registration is removed.
    ///
    /// # Errors
    ///
    /// Only failures to put the request on the wire are errors:
    /// [`ChannelError::NotConnected`] or [`ChannelError::Transport`].
    pub async fn send_and_await(
        &self,
        command: CommandId,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<RequestOutcome, ChannelError> {
        let writer = self.writer()?;
        let token = self.shared.tokens.next();
        let reply = self.shared.registry.register_pending(command, token.clone())?;
        let guard = PendingGuard {
            registry: &self.shared.registry,
            command,
            token: token.clone(),
        };

        Self::write(&writer, &Envelope::request(command, token, payload.to_vec())).await?;

        let outcome = match time::timeout(timeout, reply).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(command, token = %guard.token, ?timeout, "request timed out");
                RequestOutcome::Timeout
            }
        };
        drop(guard);
        Ok(outcome)
    }

    /// Registers `callback` for events pushed under `command`, then sends the
    /// activating request.
    ///
    /// Events are uncorrelated, so the subscription listens on token `"0"`.
    /// If the activating request cannot be sent the subscription is removed
    /// again.  Subscriptions survive reconnects until
    /// [`unsubscribe`](Self::unsubscribe) or [`shutdown`](Self::shutdown).
    pub async fn subscribe(
        &self,
        command: CommandId,
        activation: &[u8],
        limit: DeliveryLimit,
        callback: EventCallback,
    ) -> Result<SubscriptionId, ChannelError> {
        let id = self.shared.registry.register_subscription(
            command,
            CorrelationToken::fire_and_forget(),
            limit,
            callback,
        );
        if let Err(e) = self.send_fire_and_forget(command, activation).await {
            self.shared.registry.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Removes a subscription.  Telling the robot to stop pushing events is
    /// the caller's job.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.registry.unregister(id)
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watches state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// URL of the robot currently connected to.
    pub fn peer(&self) -> Option<String> {
        self.shared.transport().as_ref().map(|t| t.peer.clone())
    }

    pub fn outstanding_requests(&self) -> usize {
        self.shared.registry.pending_len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.registry.subscription_len()
    }
}

impl fmt::Debug for RobotConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RobotConnection")
            .field("state", &self.state())
            .field("peer", &self.peer())
            .field("registry", &self.shared.registry)
            .finish()
    }
}

/// Removes a pending registration when `send_and_await` returns or is
/// dropped mid-flight.
struct PendingGuard<'a> {
    registry: &'a HandlerRegistry,
    command: CommandId,
    token: CorrelationToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister_pending(self.command, &self.token);
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

async fn read_loop(weak: Weak<Shared>, mut source: WsSource, epoch: u64) {
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(epoch, "channel read error: {e}");
                break;
            }
            None => {
                debug!(epoch, "channel stream ended");
                break;
            }
        };

        let decoded = match message {
            WsMessage::Text(text) => decode_frame(&text),
            WsMessage::Binary(bytes) => decode_envelope(&bytes),
            WsMessage::Close(frame) => {
                debug!(epoch, ?frame, "robot closed the channel");
                break;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
        };

        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(epoch, "malformed envelope skipped: {e}");
                continue;
            }
        };

        let Some(shared) = weak.upgrade() else {
            return;
        };
        trace!(
            command = envelope.command,
            token = %envelope.token,
            target = envelope.target,
            bytes = envelope.payload.len(),
            "envelope received"
        );
        shared.registry.dispatch(envelope);
    }

    if let Some(shared) = weak.upgrade() {
        shared.reader_exited(epoch);
    }
}

/// Builds the command channel URL, bracketing IPv6 literals.
fn channel_url(address: &str, port: u16) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("ws://[{address}]:{port}")
    } else {
        format!("ws://{address}:{port}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
