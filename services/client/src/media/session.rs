//! A negotiated media leg and everything it owns.

use super::{
    DATA_CHANNEL_LABEL, LivenessFlag, LocalAudioTrack, MediaBackend, Negotiator, PeerConnection,
    PeerEvent, PeerState,
};
use crate::error::{NegotiationError, SessionError};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};
use voxline_core::SessionId;

/// What a media session needs to get going.
#[derive(Clone)]
pub struct MediaSetup {
    pub backend: Arc<dyn MediaBackend>,
    pub negotiator: Negotiator,
    pub ice_servers: Vec<String>,
}

/// Local tracks, stopped when released.
struct LocalTracks(Vec<Arc<dyn LocalAudioTrack>>);

impl LocalTracks {
    fn stop(&self) {
        for track in &self.0 {
            track.stop();
        }
    }
}

impl Drop for LocalTracks {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A negotiated media leg.
///
/// Prefer [`MediaSession::close`]. Dropping the session still stops the local
/// tracks and the event pump, and closes the peer on a background task.
pub struct MediaSession {
    peer: Arc<dyn PeerConnection>,
    tracks: LocalTracks,
    liveness: LivenessFlag,
    pump: JoinHandle<()>,
    closed: bool,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("tracks", &self.tracks.0.len())
            .field("liveness", &self.liveness)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MediaSession {
    /// Acquires the microphone, builds the peer and completes the offer/answer
    /// exchange. Data-channel text is passed to `on_data` as it arrives.
    ///
    /// Everything acquired so far is released if any step fails, `cancel`
    /// fires first, or the future is dropped.
    #[instrument(name = "media_negotiate", skip_all, fields(session_id = %session_id))]
    pub async fn negotiate<F>(
        setup: MediaSetup,
        session_id: &SessionId,
        cancel: &CancellationToken,
        on_data: F,
    ) -> Result<Self, SessionError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let tracks = LocalTracks(
            setup
                .backend
                .acquire_audio()
                .await
                .map_err(SessionError::MediaUnavailable)?,
        );
        if tracks.0.is_empty() {
            return Err(SessionError::MediaUnavailable(anyhow::anyhow!(
                "no audio tracks were granted"
            )));
        }
        info!(tracks = tracks.0.len(), "microphone acquired");

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = setup
            .backend
            .create_peer(&setup.ice_servers, events_tx)
            .await
            .map_err(SessionError::Peer)?;

        let liveness = LivenessFlag::new();
        let pump = tokio::spawn(
            pump_events(events_rx, liveness.clone(), on_data).in_current_span(),
        );
        let session = Self {
            peer: Arc::from(peer),
            tracks,
            liveness,
            pump,
            closed: false,
        };

        let outcome = tokio::select! {
            result = session.connect(&setup.negotiator, session_id) => result,
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
        };
        match outcome {
            Ok(()) => Ok(session),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = ?close_err, "failed to release media after setup error");
                }
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        negotiator: &Negotiator,
        session_id: &SessionId,
    ) -> Result<(), SessionError> {
        for track in &self.tracks.0 {
            self.peer
                .add_audio_track(track.clone())
                .await
                .with_context(|| format!("adding audio track {}", track.id()))
                .map_err(SessionError::Peer)?;
        }
        self.peer
            .create_data_channel(DATA_CHANNEL_LABEL)
            .await
            .map_err(SessionError::Peer)?;

        let offer = self.peer.create_offer().await.map_err(SessionError::Peer)?;
        let answer = negotiator.exchange(session_id, &offer).await?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(NegotiationError::Peer)?;
        info!("answer applied");
        Ok(())
    }

    /// A handle that reports whether the peer is currently connected.
    pub fn liveness(&self) -> LivenessFlag {
        self.liveness.clone()
    }

    /// Stops every local track, closes the peer and waits for the event pump.
    pub async fn close(mut self) -> Result<()> {
        self.liveness.set(false);
        self.tracks.stop();
        let result = self.peer.close().await.context("closing peer connection");
        self.closed = true;
        self.pump.abort();
        let _ = (&mut self.pump).await;
        self.liveness.set(false);
        debug!("media session closed");
        result
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.liveness.set(false);
        self.tracks.stop();
        self.pump.abort();
        if self.closed {
            return;
        }
        let peer = self.peer.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = peer.close().await {
                        warn!(error = ?e, "failed to close abandoned peer connection");
                    }
                });
            }
            Err(_) => warn!("media session dropped outside a runtime, peer left open"),
        }
    }
}

async fn pump_events<F>(
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    liveness: LivenessFlag,
    on_data: F,
) where
    F: Fn(&str) + Send + Sync + 'static,
{
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::RemoteTrack { id, kind } => info!(%id, %kind, "remote track received"),
            PeerEvent::IceCandidate(candidate) => debug!(%candidate, "local ICE candidate"),
            PeerEvent::ConnectionState(state) => {
                info!(?state, "peer connection state changed");
                liveness.set(state == PeerState::Connected);
            }
            PeerEvent::DataChannelMessage(text) => on_data(&text),
        }
    }
}
