//! Error types for session setup.
//!
//! Only setup failures surface as errors. Transport trouble after a session is
//! active is reported through state changes and infolog events instead.

/// Failure of the offer/answer exchange with the backend.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("offer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("offer rejected with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("answer is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed answer: {0}")]
    MalformedAnswer(String),
    #[error("could not apply answer: {0:#}")]
    Peer(anyhow::Error),
}

/// Setup-fatal failure of [`crate::controller::SessionController::start`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("microphone unavailable: {0:#}")]
    MediaUnavailable(anyhow::Error),
    #[error("peer connection failed: {0:#}")]
    Peer(anyhow::Error),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("session setup was cancelled")]
    Cancelled,
}
