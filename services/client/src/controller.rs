//! Session Controller
//!
//! Owns everything a session holds: the media leg, the WebSocket text channel
//! and the optional SSE fallback. All three feed one [`DisplayEvents`] stream
//! through a per-session [`SessionEmitter`] that goes silent the moment the
//! session is torn down.

use crate::{
    config::{ClientConfig, ConfigError},
    endpoints::Endpoints,
    error::SessionError,
    media::{MediaBackend, MediaLiveness, MediaSession, MediaSetup, Negotiator},
    transport::{
        ChannelConfig, ChannelState, ChannelStateChange, DisconnectCause, FallbackStream,
        ReliableChannel,
    },
};
use serde_json::Value;
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use voxline_core::{
    DisplayEvent, InboundOutcome, InboundSource, SessionId, decode_inbound, inbound::classify,
};

pub const CHANNEL_ESTABLISHED_NOTICE: &str = "Text chat connection established";
pub const CHANNEL_ERROR_NOTICE: &str = "Text chat connection error. Some messages may not appear.";
pub const CHANNEL_CLOSED_NOTICE: &str =
    "Text chat connection closed. Voice connection still active. Attempting to reconnect...";
pub const SESSION_ENDED_NOTICE: &str = "Conversation ended";

/// The single outbound stream of display events handed to the host.
pub type DisplayEvents = mpsc::UnboundedReceiver<DisplayEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    Negotiating,
    Active,
    Closing,
}

/// Forwards one session's events to the host until its token is cancelled.
#[derive(Clone)]
struct SessionEmitter {
    tx: mpsc::UnboundedSender<DisplayEvent>,
    live: CancellationToken,
    session_id: SessionId,
}

impl SessionEmitter {
    fn emit(&self, event: DisplayEvent) {
        if self.live.is_cancelled() {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!(session_id = %self.session_id, "display stream receiver dropped");
        }
    }

    fn ingest(&self, source: InboundSource, text: &str) {
        self.deliver(source, decode_inbound(source, text));
    }

    fn ingest_value(&self, source: InboundSource, value: &Value) {
        self.deliver(source, classify(value));
    }

    fn deliver(&self, source: InboundSource, outcome: InboundOutcome) {
        match outcome {
            InboundOutcome::Display(event) => self.emit(event),
            InboundOutcome::Dropped(reason) => {
                debug!(session_id = %self.session_id, %source, ?reason, "dropping inbound payload")
            }
        }
    }
}

/// Turns channel state changes into the user-facing connection notices.
#[derive(Debug, Default)]
struct ConnectionNotices {
    error_shown: AtomicBool,
}

impl ConnectionNotices {
    fn notice_for(&self, change: &ChannelStateChange) -> Option<&'static str> {
        match (&change.state, &change.cause) {
            (ChannelState::Open, _) => {
                self.error_shown.store(false, Ordering::SeqCst);
                Some(CHANNEL_ESTABLISHED_NOTICE)
            }
            (_, Some(DisconnectCause::Error(_))) => {
                // Once per streak of errors.
                (!self.error_shown.swap(true, Ordering::SeqCst)).then_some(CHANNEL_ERROR_NOTICE)
            }
            (ChannelState::Reconnecting, Some(DisconnectCause::Closed)) => {
                Some(CHANNEL_CLOSED_NOTICE)
            }
            _ => None,
        }
    }
}

struct ActiveSession {
    id: SessionId,
    media: MediaSession,
    channel: ReliableChannel,
    fallback: Option<FallbackStream>,
    token: CancellationToken,
}

impl ActiveSession {
    /// Silences the session first, then releases each resource. A failure in
    /// one step does not stop the others.
    async fn teardown(self) {
        self.token.cancel();
        if let Some(fallback) = self.fallback {
            fallback.close().await;
        }
        self.channel.close().await;
        if let Err(e) = self.media.close().await {
            warn!(session_id = %self.id, error = ?e, "error while closing media session");
        }
    }
}

enum Phase {
    Idle,
    Negotiating {
        id: SessionId,
        token: CancellationToken,
        settled: CancellationToken,
    },
    Active(ActiveSession),
    Closing,
}

impl Phase {
    fn is_negotiating(&self, session: &SessionId) -> bool {
        matches!(self, Phase::Negotiating { id, .. } if id == session)
    }
}

fn lock_phase(phase: &Mutex<Phase>) -> MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns the controller to idle if `start` or `stop` exits without doing so
/// itself, including when its future is dropped.
struct IdleOnDrop<'a> {
    phase: &'a Mutex<Phase>,
    /// The negotiation owned by `start`; `None` for `stop`.
    negotiation: Option<(SessionId, CancellationToken)>,
}

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        let mut phase = lock_phase(self.phase);
        let reset = match &self.negotiation {
            Some((id, token)) if phase.is_negotiating(id) => {
                token.cancel();
                true
            }
            Some(_) => false,
            None => matches!(*phase, Phase::Closing),
        };
        if reset {
            debug!("abandoned session operation, controller back to idle");
            *phase = Phase::Idle;
        }
    }
}

pub struct SessionController {
    config: ClientConfig,
    endpoints: Endpoints,
    http: reqwest::Client,
    backend: Arc<dyn MediaBackend>,
    events: mpsc::UnboundedSender<DisplayEvent>,
    phase: Mutex<Phase>,
}

impl SessionController {
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn MediaBackend>,
    ) -> Result<(Self, DisplayEvents), ConfigError> {
        let endpoints = Endpoints::new(&config.base_url)?;
        let (events, display_events) = mpsc::unbounded_channel();
        let controller = Self {
            config,
            endpoints,
            http: reqwest::Client::new(),
            backend,
            events,
            phase: Mutex::new(Phase::Idle),
        };
        Ok((controller, display_events))
    }

    pub fn phase(&self) -> ControllerPhase {
        match &*lock_phase(&self.phase) {
            Phase::Idle => ControllerPhase::Idle,
            Phase::Negotiating { .. } => ControllerPhase::Negotiating,
            Phase::Active(_) => ControllerPhase::Active,
            Phase::Closing => ControllerPhase::Closing,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match &*lock_phase(&self.phase) {
            Phase::Negotiating { id, .. } => Some(id.clone()),
            Phase::Active(active) => Some(active.id.clone()),
            Phase::Idle | Phase::Closing => None,
        }
    }

    /// Starts a new session. Returns `Ok(None)` without doing anything unless
    /// the controller is idle.
    ///
    /// On failure the controller is back to idle, everything acquired has been
    /// released, and one infolog describing the failure has been emitted.
    /// Dropping the returned future abandons the attempt the same way.
    #[instrument(name = "session_start", skip(self), fields(session_id))]
    pub async fn start(&self) -> Result<Option<SessionId>, SessionError> {
        let id = SessionId::generate();
        let token = CancellationToken::new();
        let settled = CancellationToken::new();
        {
            let mut phase = lock_phase(&self.phase);
            if !matches!(*phase, Phase::Idle) {
                debug!("start ignored, a session is already in progress");
                return Ok(None);
            }
            *phase = Phase::Negotiating {
                id: id.clone(),
                token: token.clone(),
                settled: settled.clone(),
            };
        }
        // Dropped in reverse order: the phase is reset before a waiting `stop` wakes.
        let _settled = settled.drop_guard();
        let _idle = IdleOnDrop {
            phase: &self.phase,
            negotiation: Some((id.clone(), token.clone())),
        };
        tracing::Span::current().record("session_id", id.as_str());
        info!("starting session");

        let emitter = SessionEmitter {
            tx: self.events.clone(),
            live: token.clone(),
            session_id: id.clone(),
        };
        match self.negotiate_media(&id, &token, emitter.clone()).await {
            Ok(media) => {
                let unclaimed = {
                    let mut phase = lock_phase(&self.phase);
                    if phase.is_negotiating(&id) {
                        *phase = Phase::Active(self.activate(id.clone(), media, token, emitter));
                        None
                    } else {
                        Some(media)
                    }
                };
                match unclaimed {
                    None => {
                        info!("session active");
                        Ok(Some(id))
                    }
                    Some(media) => {
                        info!("session stopped during negotiation, releasing media");
                        if let Err(e) = media.close().await {
                            warn!(error = ?e, "error while closing media session");
                        }
                        Err(SessionError::Cancelled)
                    }
                }
            }
            Err(e) => {
                {
                    let mut phase = lock_phase(&self.phase);
                    if phase.is_negotiating(&id) {
                        *phase = Phase::Idle;
                    }
                }
                if !matches!(e, SessionError::Cancelled) {
                    warn!(error = %e, "session setup failed");
                    emitter.emit(DisplayEvent::infolog(format!(
                        "Could not start session: {}",
                        e
                    )));
                }
                token.cancel();
                Err(e)
            }
        }
    }

    /// Ends the current session, if any, and waits until every task it owned
    /// has exited.
    #[instrument(name = "session_stop", skip(self))]
    pub async fn stop(&self) {
        let previous = {
            let mut phase = lock_phase(&self.phase);
            if matches!(*phase, Phase::Idle | Phase::Closing) {
                return;
            }
            std::mem::replace(&mut *phase, Phase::Closing)
        };
        let _idle = IdleOnDrop {
            phase: &self.phase,
            negotiation: None,
        };

        let id = match previous {
            Phase::Negotiating { id, token, settled } => {
                token.cancel();
                settled.cancelled().await;
                id
            }
            Phase::Active(active) => {
                let id = active.id.clone();
                active.teardown().await;
                id
            }
            Phase::Idle | Phase::Closing => return,
        };

        *lock_phase(&self.phase) = Phase::Idle;
        info!(session_id = %id, "session ended");
        if self
            .events
            .send(DisplayEvent::infolog(SESSION_ENDED_NOTICE))
            .is_err()
        {
            debug!("display stream receiver dropped");
        }
    }

    pub async fn restart(&self) -> Result<Option<SessionId>, SessionError> {
        self.stop().await;
        self.start().await
    }

    async fn negotiate_media(
        &self,
        id: &SessionId,
        token: &CancellationToken,
        emitter: SessionEmitter,
    ) -> Result<MediaSession, SessionError> {
        let setup = MediaSetup {
            backend: self.backend.clone(),
            negotiator: Negotiator::new(self.http.clone(), self.endpoints.offer()),
            ice_servers: self.config.ice_servers.clone(),
        };
        MediaSession::negotiate(setup, id, token, move |text| {
            emitter.ingest(InboundSource::DataChannel, text)
        })
        .await
    }

    fn activate(
        &self,
        id: SessionId,
        media: MediaSession,
        token: CancellationToken,
        emitter: SessionEmitter,
    ) -> ActiveSession {
        let liveness: Arc<dyn MediaLiveness> = Arc::new(media.liveness());
        let channel = ReliableChannel::new(
            ChannelConfig {
                heartbeat_interval: self.config.heartbeat_interval,
                reconnect_after_error: self.config.reconnect_after_error,
                reconnect_after_close: self.config.reconnect_after_close,
            },
            liveness,
        );

        let message_emitter = emitter.clone();
        channel.on_message(move |text| message_emitter.ingest(InboundSource::ReliableChannel, text));
        let notices = ConnectionNotices::default();
        let notice_emitter = emitter.clone();
        channel.on_state_change(move |change| {
            if let Some(notice) = notices.notice_for(change) {
                notice_emitter.emit(DisplayEvent::infolog(notice));
            }
        });
        channel.open(self.endpoints.chat_socket(&id).to_string());

        let fallback = self.config.fallback_stream.then(|| {
            let stream = FallbackStream::new(self.http.clone());
            let stream_emitter = emitter.clone();
            stream.on_message(move |value| {
                stream_emitter.ingest_value(InboundSource::FallbackStream, value)
            });
            stream.open(self.endpoints.outputs(&id));
            stream
        });

        ActiveSession {
            id,
            media,
            channel,
            fallback,
            token,
        }
    }
}
