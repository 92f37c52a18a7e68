//! Offer/answer exchange with the backend over HTTP.

use super::{SdpType, SessionDescription};
use crate::error::NegotiationError;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use voxline_core::SessionId;

#[derive(Serialize, Debug)]
struct OfferRequest<'a> {
    webrtc_id: &'a str,
    sdp: &'a str,
    #[serde(rename = "type")]
    sdp_type: SdpType,
}

#[derive(Debug, Clone)]
pub struct Negotiator {
    client: Client,
    offer_url: Url,
}

impl Negotiator {
    pub fn new(client: Client, offer_url: Url) -> Self {
        Self { client, offer_url }
    }

    /// Posts the local offer and returns the backend's answer.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn exchange(
        &self,
        session_id: &SessionId,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let body = OfferRequest {
            webrtc_id: session_id.as_str(),
            sdp: &offer.sdp,
            sdp_type: offer.sdp_type,
        };
        let response = self
            .client
            .post(self.offer_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(NegotiationError::Status { status, body: text });
        }
        debug!(%status, bytes = text.len(), "received answer");

        let value: Value = serde_json::from_str(&text)?;
        parse_answer(&value)
    }
}

/// Accepts `{answer: {sdp, type}}` or a bare `{sdp, type}`.
pub fn parse_answer(value: &Value) -> Result<SessionDescription, NegotiationError> {
    let answer = match value.get("answer") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    };

    let sdp_type = answer
        .get("type")
        .and_then(Value::as_str)
        .filter(|kind| !kind.is_empty())
        .ok_or_else(|| NegotiationError::MalformedAnswer("missing 'type'".to_string()))?
        .parse::<SdpType>()
        .map_err(|e| NegotiationError::MalformedAnswer(e.to_string()))?;
    let sdp = answer
        .get("sdp")
        .and_then(Value::as_str)
        .ok_or_else(|| NegotiationError::MalformedAnswer("missing 'sdp'".to_string()))?;

    Ok(SessionDescription {
        sdp_type,
        sdp: sdp.to_string(),
    })
}
