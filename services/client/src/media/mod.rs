//! Real-time media leg of a session.
//!
//! The platform media stack (microphone capture, peer connection, codecs) is
//! supplied by the host through [`MediaBackend`]. This module drives the
//! offer/answer protocol over it and tracks whether the media leg is alive.

pub mod liveness;
pub mod negotiate;
pub mod session;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tokio::sync::mpsc;

pub use liveness::{LivenessFlag, MediaLiveness};
pub use negotiate::Negotiator;
pub use session::{MediaSession, MediaSetup};

/// Label of the data-channel that carries text alongside the audio.
pub const DATA_CHANNEL_LABEL: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl FromStr for SdpType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            "pranswer" => Ok(SdpType::Pranswer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(anyhow!("unknown session description type '{}'", other)),
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Connection state reported by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from a [`PeerConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    RemoteTrack { id: String, kind: String },
    IceCandidate(String),
    ConnectionState(PeerState),
    /// A text frame received on the `chat` data-channel.
    DataChannelMessage(String),
}

/// A captured local audio source.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> String;
    /// Releases the device. Must be safe to call more than once.
    fn stop(&self);
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_audio_track(&self, track: Arc<dyn LocalAudioTrack>) -> Result<()>;
    async fn create_data_channel(&self, label: &str) -> Result<()>;
    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn set_remote_description(&self, answer: SessionDescription) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Entry point into the host platform's media stack.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Requests microphone access. Called once per session start.
    async fn acquire_audio(&self) -> Result<Vec<Arc<dyn LocalAudioTrack>>>;

    /// Builds a peer connection that reports its events through `events`.
    async fn create_peer(
        &self,
        ice_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let offer = SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&offer).unwrap(),
            serde_json::json!({"type": "offer", "sdp": "v=0"})
        );
    }

    #[test]
    fn test_sdp_type_parsing() {
        assert_eq!("answer".parse::<SdpType>().unwrap(), SdpType::Answer);
        assert!("Answer".parse::<SdpType>().is_err());
        assert!("".parse::<SdpType>().is_err());
        assert_eq!(SdpType::Pranswer.to_string(), "pranswer");
    }
}
