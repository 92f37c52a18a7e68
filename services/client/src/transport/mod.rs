//! Text transports that run alongside the media leg.

pub mod fallback;
pub mod reliable;

pub use fallback::FallbackStream;
pub use reliable::{
    ChannelConfig, ChannelState, ChannelStateChange, DisconnectCause, ReliableChannel,
};
