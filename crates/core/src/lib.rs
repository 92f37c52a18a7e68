//! Voxline Core
//!
//! Transport-independent domain types for the voice agent client: the
//! canonical [`DisplayEvent`], session identifiers, and the normalization
//! rules that turn loosely structured backend payloads into display events.
//! Nothing in this crate performs I/O.

pub mod display;
pub mod inbound;
pub mod normalizer;
pub mod session;
pub mod transcript;

pub use display::{DisplayEvent, INFOLOG_ROLE};
pub use inbound::{DropReason, InboundOutcome, InboundSource, decode_inbound};
pub use normalizer::normalize;
pub use session::SessionId;
