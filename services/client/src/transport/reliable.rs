//! Reconnecting WebSocket text channel.
//!
//! One connection task runs per attempt. It owns the socket halves and
//! multiplexes shutdown, the keep-alive ticker, outbound frames and inbound
//! frames in a single `select!` loop. When the socket is lost the task reports
//! back, and a reconnect is scheduled only while the media leg is alive.

use crate::{
    handlers::{HandlerId, HandlerRegistry},
    media::MediaLiveness,
    timer::ScopedTimer,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval_at, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);
const TASK_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    Error(String),
    /// The server closed the connection cleanly.
    Closed,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::Error(message) => write!(f, "error: {}", message),
            DisconnectCause::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStateChange {
    pub state: ChannelState,
    pub attempt: u64,
    /// Set when the change was caused by losing the connection.
    pub cause: Option<DisconnectCause>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_after_error: Duration,
    pub reconnect_after_close: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_after_error: Duration::from_secs(5),
            reconnect_after_close: Duration::from_secs(2),
        }
    }
}

/// Frames the client originates on its own.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

struct Connection {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    state: ChannelState,
    attempt: u64,
    url: Option<String>,
    terminated: bool,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection: Option<Connection>,
    reconnect: Option<ScopedTimer>,
}

struct Inner {
    config: ChannelConfig,
    media: Arc<dyn MediaLiveness>,
    shared: Mutex<Shared>,
    messages: HandlerRegistry<str>,
    states: HandlerRegistry<ChannelStateChange>,
}

/// A persistent text channel that survives transient disconnects while the
/// media leg is active.
pub struct ReliableChannel {
    inner: Arc<Inner>,
}

impl ReliableChannel {
    pub fn new(config: ChannelConfig, media: Arc<dyn MediaLiveness>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                media,
                shared: Mutex::new(Shared {
                    state: ChannelState::Closed,
                    attempt: 0,
                    url: None,
                    terminated: false,
                    outbound: None,
                    connection: None,
                    reconnect: None,
                }),
                messages: HandlerRegistry::new(),
                states: HandlerRegistry::new(),
            }),
        }
    }

    /// Starts connecting to `url`. Does nothing while a connection is being
    /// made or is up, or once the channel has been closed.
    pub fn open(&self, url: impl Into<String>) {
        let change = {
            let mut shared = self.inner.lock();
            if shared.terminated || shared.state != ChannelState::Closed {
                return;
            }
            shared.url = Some(url.into());
            self.inner.begin_attempt(&mut shared)
        };
        if let Some(change) = change {
            self.inner.states.dispatch(&change);
        }
    }

    /// Queues `message` as a JSON text frame. Returns `false` if the channel
    /// is not open.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let shared = self.inner.lock();
        let outbound = match (&shared.outbound, shared.state) {
            (Some(outbound), ChannelState::Open) => outbound,
            _ => {
                warn!(state = ?shared.state, "dropping outbound message, channel is not open");
                return false;
            }
        };
        match serde_json::to_string(message) {
            Ok(frame) => outbound.send(frame).is_ok(),
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.messages.subscribe(handler)
    }

    pub fn on_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ChannelStateChange) + Send + Sync + 'static,
    {
        self.inner.states.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.inner.messages.unsubscribe(id) | self.inner.states.unsubscribe(id)
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn attempt(&self) -> u64 {
        self.inner.lock().attempt
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner
            .lock()
            .reconnect
            .as_ref()
            .is_some_and(ScopedTimer::is_pending)
    }

    /// Shuts the channel down for good.
    ///
    /// Cancels any pending reconnect, drops every handler and waits for the
    /// connection task to finish, so no handler runs after this returns.
    pub async fn close(&self) {
        let (connection, timer) = {
            let mut shared = self.inner.lock();
            shared.terminated = true;
            shared.state = ChannelState::Closed;
            shared.outbound = None;
            (shared.connection.take(), shared.reconnect.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        self.inner.messages.clear();
        self.inner.states.clear();

        if let Some(connection) = connection {
            connection.shutdown.cancel();
            let abort = connection.task.abort_handle();
            if timeout(TASK_EXIT_TIMEOUT, connection.task).await.is_err() {
                warn!("connection task did not exit in time, aborting");
                abort.abort();
            }
        }
        debug!("reliable channel closed");
    }
}

impl Drop for ReliableChannel {
    fn drop(&mut self) {
        let mut shared = self.inner.lock();
        shared.terminated = true;
        shared.reconnect = None;
        if let Some(connection) = shared.connection.take() {
            connection.shutdown.cancel();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_attempt(self: &Arc<Self>, shared: &mut Shared) -> Option<ChannelStateChange> {
        let url = shared.url.clone()?;
        shared.attempt += 1;
        shared.state = ChannelState::Connecting;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        shared.outbound = Some(outbound_tx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            self.clone(),
            shared.attempt,
            url,
            shutdown.clone(),
            outbound_rx,
        ));
        if let Some(previous) = shared.connection.replace(Connection { shutdown, task }) {
            previous.shutdown.cancel();
        }
        info!(attempt = shared.attempt, "connecting text channel");

        Some(ChannelStateChange {
            state: ChannelState::Connecting,
            attempt: shared.attempt,
            cause: None,
        })
    }

    /// Returns `false` if `attempt` is no longer the current one.
    fn on_open(&self, attempt: u64) -> bool {
        let change = {
            let mut shared = self.lock();
            if shared.terminated || shared.attempt != attempt {
                return false;
            }
            shared.state = ChannelState::Open;
            ChannelStateChange {
                state: ChannelState::Open,
                attempt,
                cause: None,
            }
        };
        info!(attempt, "text channel open");
        self.states.dispatch(&change);
        true
    }

    fn on_disconnect(self: &Arc<Self>, attempt: u64, cause: DisconnectCause) {
        let change = {
            let mut shared = self.lock();
            if shared.terminated || shared.attempt != attempt {
                return;
            }
            shared.outbound = None;

            if self.media.is_media_active() {
                let delay = match cause {
                    DisconnectCause::Error(_) => self.config.reconnect_after_error,
                    DisconnectCause::Closed => self.config.reconnect_after_close,
                };
                let weak = Arc::downgrade(self);
                shared.reconnect = Some(ScopedTimer::schedule(delay, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire_reconnect(attempt);
                    }
                }));
                shared.state = ChannelState::Reconnecting;
                info!(attempt, ?delay, %cause, "text channel lost, reconnect scheduled");
            } else {
                shared.state = ChannelState::Closed;
                info!(attempt, %cause, "text channel lost, media inactive so not reconnecting");
            }

            ChannelStateChange {
                state: shared.state,
                attempt,
                cause: Some(cause),
            }
        };
        if let Some(DisconnectCause::Error(message)) = &change.cause {
            warn!(attempt, error = %message, "text channel error");
        }
        self.states.dispatch(&change);
    }

    fn fire_reconnect(self: &Arc<Self>, attempt: u64) {
        let change = {
            let mut shared = self.lock();
            if shared.terminated
                || shared.attempt != attempt
                || shared.state != ChannelState::Reconnecting
            {
                return;
            }
            // The timer that is running this callback.
            let _fired = shared.reconnect.take();

            if !self.media.is_media_active() {
                shared.state = ChannelState::Closed;
                info!(attempt, "media no longer active, abandoning reconnect");
                Some(ChannelStateChange {
                    state: ChannelState::Closed,
                    attempt,
                    cause: None,
                })
            } else {
                self.begin_attempt(&mut shared)
            }
        };
        if let Some(change) = change {
            self.states.dispatch(&change);
        }
    }
}

async fn run_connection(
    inner: Arc<Inner>,
    attempt: u64,
    url: String,
    shutdown: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let connected = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = connect_async(url.as_str()) => result,
    };
    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            inner.on_disconnect(attempt, DisconnectCause::Error(e.to_string()));
            return;
        }
    };
    let (mut socket_tx, mut socket_rx) = ws_stream.split();
    if !inner.on_open(attempt) {
        let _ = timeout(CLOSE_FRAME_TIMEOUT, socket_tx.send(Message::Close(None))).await;
        return;
    }

    let period = inner.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut received: u64 = 0;

    let cause = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = timeout(CLOSE_FRAME_TIMEOUT, socket_tx.send(Message::Close(None))).await;
                debug!(attempt, received, "connection task shut down");
                return;
            }
            _ = heartbeat.tick() => {
                match serde_json::to_string(&ClientFrame::Ping) {
                    Ok(frame) => {
                        if let Err(e) = socket_tx.send(Message::Text(frame.into())).await {
                            warn!(attempt, error = %e, "failed to send keep-alive");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize keep-alive"),
                }
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = socket_tx.send(Message::Text(frame.into())).await {
                    warn!(attempt, error = %e, "failed to send message");
                }
            }
            incoming = socket_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    received += 1;
                    debug!(attempt, received, "text channel message received");
                    inner.messages.dispatch(text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break DisconnectCause::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => break DisconnectCause::Error(e.to_string()),
            },
        }
    };
    inner.on_disconnect(attempt, cause);
}
