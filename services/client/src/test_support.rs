//! In-process backend and media fakes shared by the unit tests.

use crate::{
    endpoints::Endpoints,
    media::{
        LocalAudioTrack, MediaBackend, PeerConnection, PeerEvent, PeerState, SdpType,
        SessionDescription,
    },
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};

const DEFAULT_ANSWER: &str = r#"{"answer":{"type":"answer","sdp":"v=0 remote"}}"#;

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct FixtureState {
    offer_status: u16,
    offer_body: String,
    offer_delay: Duration,
    offers: Vec<Value>,
    greeting: Vec<String>,
    close_after_greeting: bool,
    chat_received: Vec<String>,
    chat_sessions: Vec<String>,
    output_frames: Vec<String>,
    output_sessions: Vec<String>,
}

type SharedState = Arc<Mutex<FixtureState>>;

/// A stand-in for the agent backend: offer endpoint, chat socket and SSE stream.
pub struct Fixture {
    addr: SocketAddr,
    state: SharedState,
    server: JoinHandle<()>,
}

impl Fixture {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FixtureState {
            offer_status: 200,
            offer_body: DEFAULT_ANSWER.to_string(),
            offer_delay: Duration::ZERO,
            offers: Vec::new(),
            greeting: Vec::new(),
            close_after_greeting: false,
            chat_received: Vec::new(),
            chat_sessions: Vec::new(),
            output_frames: Vec::new(),
            output_sessions: Vec::new(),
        }));
        let router = Router::new()
            .route("/webrtc/offer", post(offer))
            .route("/ws/chat", get(chat))
            .route("/outputs", get(outputs))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.base_url()).unwrap()
    }

    pub fn set_offer_response(&self, status: u16, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.offer_status = status;
        state.offer_body = body.to_string();
    }

    pub fn set_offer_delay(&self, delay: Duration) {
        self.state.lock().unwrap().offer_delay = delay;
    }

    pub fn set_greeting(&self, frames: Vec<String>) {
        self.state.lock().unwrap().greeting = frames;
    }

    pub fn set_close_after_greeting(&self, close: bool) {
        self.state.lock().unwrap().close_after_greeting = close;
    }

    pub fn set_outputs(&self, frames: Vec<String>) {
        self.state.lock().unwrap().output_frames = frames;
    }

    pub fn offers(&self) -> Vec<Value> {
        self.state.lock().unwrap().offers.clone()
    }

    pub fn chat_received(&self) -> Vec<String> {
        self.state.lock().unwrap().chat_received.clone()
    }

    pub fn chat_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().chat_sessions.clone()
    }

    pub fn chat_connections(&self) -> usize {
        self.state.lock().unwrap().chat_sessions.len()
    }

    pub fn output_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().output_sessions.clone()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn offer(State(state): State<SharedState>, body: Bytes) -> Response {
    let (status, reply, delay) = {
        let mut state = state.lock().unwrap();
        let recorded = serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
        state.offers.push(recorded);
        (state.offer_status, state.offer_body.clone(), state.offer_delay)
    };
    tokio::time::sleep(delay).await;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, reply).into_response()
}

async fn chat(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<SharedState>,
) -> Response {
    let session = params.get("webrtc_id").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| serve_chat(socket, session, state))
}

async fn serve_chat(mut socket: WebSocket, session: String, state: SharedState) {
    let (greeting, close) = {
        let mut state = state.lock().unwrap();
        state.chat_sessions.push(session);
        (state.greeting.clone(), state.close_after_greeting)
    };
    for frame in greeting {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    if close {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let mut state = state.lock().unwrap();
                state.chat_received.push(text.as_str().to_string());
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn outputs(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let frames = {
        let mut state = state.lock().unwrap();
        state
            .output_sessions
            .push(params.get("webrtc_id").cloned().unwrap_or_default());
        state.output_frames.clone()
    };
    let events = frames
        .into_iter()
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame)));
    Sse::new(futures_util::stream::iter(events))
}

/// Counters describing what the fake media stack was asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeStats {
    pub acquisitions: usize,
    pub tracks_stopped: usize,
    pub peers_created: usize,
    pub peers_closed: usize,
    pub data_channels: Vec<String>,
    pub ice_servers: Vec<String>,
    pub remote_description: Option<String>,
}

type SharedStats = Arc<Mutex<FakeStats>>;

/// A media backend that grants one track and connects as soon as an answer
/// is applied.
#[derive(Clone, Default)]
pub struct FakeBackend {
    deny_audio: bool,
    fail_peer: bool,
    stats: SharedStats,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>>,
}

impl FakeBackend {
    pub fn denying_audio() -> Self {
        Self {
            deny_audio: true,
            ..Self::default()
        }
    }

    pub fn failing_peer() -> Self {
        Self {
            fail_peer: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> FakeStats {
        self.stats.lock().unwrap().clone()
    }

    /// Delivers `event` as if the most recent peer had raised it.
    pub fn inject(&self, event: PeerEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn acquire_audio(&self) -> Result<Vec<Arc<dyn LocalAudioTrack>>> {
        self.stats.lock().unwrap().acquisitions += 1;
        if self.deny_audio {
            return Err(anyhow!("permission denied"));
        }
        let track: Arc<dyn LocalAudioTrack> = Arc::new(FakeTrack {
            stopped: AtomicBool::new(false),
            stats: self.stats.clone(),
        });
        Ok(vec![track])
    }

    async fn create_peer(
        &self,
        ice_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>> {
        if self.fail_peer {
            return Err(anyhow!("no network interfaces"));
        }
        {
            let mut stats = self.stats.lock().unwrap();
            stats.peers_created += 1;
            stats.ice_servers = ice_servers.to_vec();
        }
        *self.events.lock().unwrap() = Some(events.clone());
        let _ = events.send(PeerEvent::ConnectionState(PeerState::New));
        Ok(Box::new(FakePeer {
            stats: self.stats.clone(),
            events,
        }))
    }
}

struct FakeTrack {
    stopped: AtomicBool,
    stats: SharedStats,
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> String {
        "fake-microphone".to_string()
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stats.lock().unwrap().tracks_stopped += 1;
        }
    }
}

struct FakePeer {
    stats: SharedStats,
    events: mpsc::UnboundedSender<PeerEvent>,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_audio_track(&self, _track: Arc<dyn LocalAudioTrack>) -> Result<()> {
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.stats
            .lock()
            .unwrap()
            .data_channels
            .push(label.to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let _ = self
            .events
            .send(PeerEvent::IceCandidate("candidate:1 1 udp 1 127.0.0.1 9 typ host".to_string()));
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 local".to_string(),
        })
    }

    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()> {
        self.stats.lock().unwrap().remote_description = Some(answer.sdp);
        let _ = self.events.send(PeerEvent::RemoteTrack {
            id: "remote-audio".to_string(),
            kind: "audio".to_string(),
        });
        let _ = self
            .events
            .send(PeerEvent::ConnectionState(PeerState::Connected));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stats.lock().unwrap().peers_closed += 1;
        let _ = self.events.send(PeerEvent::ConnectionState(PeerState::Closed));
        Ok(())
    }
}
