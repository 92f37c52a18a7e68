//! Voxline Client
//!
//! Session transport for the voice agent: negotiates the media leg, keeps the
//! WebSocket and SSE text paths alive, and delivers every normalized message
//! to the host through one stream owned by [`SessionController`].

pub mod config;
pub mod controller;
pub mod endpoints;
pub mod error;
pub mod handlers;
pub mod media;
pub mod telemetry;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, ConfigError};
pub use controller::{ControllerPhase, DisplayEvents, SessionController};
pub use error::{NegotiationError, SessionError};
pub use voxline_core::{DisplayEvent, SessionId};
