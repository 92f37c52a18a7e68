//! Inbound Decode Policy
//!
//! Every transport hands raw text frames to [`decode_inbound`], which decodes
//! JSON, runs the normalizer and applies the per-source salvage rule: the
//! media data-channel may carry plain text, which is shown as an infolog line;
//! the text transports only carry protocol JSON, so anything undecodable there
//! is noise.

use crate::{
    display::DisplayEvent,
    normalizer::{self, Verdict},
};
use serde_json::Value;
use std::fmt;

/// The transport a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundSource {
    DataChannel,
    ReliableChannel,
    FallbackStream,
}

impl InboundSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundSource::DataChannel => "data_channel",
            InboundSource::ReliableChannel => "reliable_channel",
            InboundSource::FallbackStream => "fallback_stream",
        }
    }

    /// Whether undecodable text from this source is shown rather than dropped.
    pub fn salvages_plain_text(&self) -> bool {
        matches!(self, InboundSource::DataChannel)
    }
}

impl fmt::Display for InboundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not JSON, on a source that does not salvage plain text.
    Undecodable,
    /// Keep-alive traffic.
    KeepAlive,
    /// Valid JSON that no normalizer rule recognized.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Display(DisplayEvent),
    Dropped(DropReason),
}

impl InboundOutcome {
    pub fn into_event(self) -> Option<DisplayEvent> {
        match self {
            InboundOutcome::Display(event) => Some(event),
            InboundOutcome::Dropped(_) => None,
        }
    }
}

/// Decodes and normalizes one raw text frame from `source`.
pub fn decode_inbound(source: InboundSource, text: &str) -> InboundOutcome {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => classify(&value),
        Err(_) if source.salvages_plain_text() => {
            InboundOutcome::Display(DisplayEvent::infolog(text))
        }
        Err(_) => InboundOutcome::Dropped(DropReason::Undecodable),
    }
}

/// Normalizes an already-decoded payload.
pub fn classify(value: &Value) -> InboundOutcome {
    match normalizer::explain(value) {
        Some((_, Verdict::Emit(event))) => InboundOutcome::Display(event),
        Some((_, Verdict::Drop)) => InboundOutcome::Dropped(DropReason::KeepAlive),
        None => InboundOutcome::Dropped(DropReason::Unrecognized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_salvaged_only_on_data_channel() {
        assert_eq!(
            decode_inbound(InboundSource::DataChannel, "hello there"),
            InboundOutcome::Display(DisplayEvent::infolog("hello there"))
        );
        assert_eq!(
            decode_inbound(InboundSource::ReliableChannel, "hello there"),
            InboundOutcome::Dropped(DropReason::Undecodable)
        );
        assert_eq!(
            decode_inbound(InboundSource::FallbackStream, "{broken"),
            InboundOutcome::Dropped(DropReason::Undecodable)
        );
    }

    #[test]
    fn test_json_is_normalized_identically_for_every_source() {
        let sources = [
            InboundSource::DataChannel,
            InboundSource::ReliableChannel,
            InboundSource::FallbackStream,
        ];
        for source in sources {
            assert_eq!(
                decode_inbound(source, r#"{"speaker":"user","text":"hi"}"#).into_event(),
                Some(DisplayEvent::new("user", "hi"))
            );
            assert_eq!(
                decode_inbound(source, r#"{"type":"ping"}"#),
                InboundOutcome::Dropped(DropReason::KeepAlive)
            );
            assert_eq!(
                decode_inbound(source, r#"{"status":"ok","code":1}"#),
                InboundOutcome::Dropped(DropReason::Unrecognized)
            );
        }
    }

    #[test]
    fn test_json_scalars_are_not_salvaged() {
        assert_eq!(
            decode_inbound(InboundSource::DataChannel, r#""quoted""#),
            InboundOutcome::Dropped(DropReason::Unrecognized)
        );
    }

    #[test]
    fn test_source_names() {
        assert_eq!(InboundSource::ReliableChannel.to_string(), "reliable_channel");
        assert!(!InboundSource::FallbackStream.salvages_plain_text());
    }
}
