//! Derives the three backend addresses a session talks to from one base URL.

use crate::config::ConfigError;
use reqwest::Url;
use voxline_core::SessionId;

const OFFER_PATH: &str = "webrtc/offer";
const OUTPUTS_PATH: &str = "outputs";
const CHAT_SOCKET_PATH: &str = "ws/chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http_base: Url,
    socket_base: Url,
}

impl Endpoints {
    /// Validates `base` (which must be `http` or `https`) and precomputes the
    /// matching `ws`/`wss` base.
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue("base_url".to_string(), reason);

        let http_base = Url::parse(base).map_err(|e| invalid(format!("'{}': {}", base, e)))?;
        let socket_scheme = match http_base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };
        if http_base.host_str().is_none() {
            return Err(invalid(format!("'{}' has no host", base)));
        }

        let mut socket_base = http_base.clone();
        socket_base
            .set_scheme(socket_scheme)
            .map_err(|_| invalid(format!("cannot derive socket address from '{}'", base)))?;

        Ok(Self {
            http_base,
            socket_base,
        })
    }

    /// `POST` target for the offer/answer exchange.
    pub fn offer(&self) -> Url {
        join(&self.http_base, OFFER_PATH)
    }

    /// Server-sent-events text stream for `session_id`.
    pub fn outputs(&self, session_id: &SessionId) -> Url {
        with_session(join(&self.http_base, OUTPUTS_PATH), session_id)
    }

    /// WebSocket text channel for `session_id`.
    pub fn chat_socket(&self, session_id: &SessionId) -> Url {
        with_session(join(&self.socket_base, CHAT_SOCKET_PATH), session_id)
    }
}

fn join(base: &Url, suffix: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), suffix);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn with_session(mut url: Url, session_id: &SessionId) -> Url {
    url.query_pairs_mut()
        .append_pair("webrtc_id", session_id.as_str());
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_maps_to_ws() {
        let endpoints = Endpoints::new("http://127.0.0.1:8000").unwrap();
        let id = SessionId::from("session_abc");

        assert_eq!(endpoints.offer().as_str(), "http://127.0.0.1:8000/webrtc/offer");
        assert_eq!(
            endpoints.outputs(&id).as_str(),
            "http://127.0.0.1:8000/outputs?webrtc_id=session_abc"
        );
        assert_eq!(
            endpoints.chat_socket(&id).as_str(),
            "ws://127.0.0.1:8000/ws/chat?webrtc_id=session_abc"
        );
    }

    #[test]
    fn test_https_base_with_path_maps_to_wss() {
        let endpoints = Endpoints::new("https://agent.example.com/voice/").unwrap();
        let id = SessionId::from("session_x");

        assert_eq!(
            endpoints.offer().as_str(),
            "https://agent.example.com/voice/webrtc/offer"
        );
        assert_eq!(
            endpoints.chat_socket(&id).as_str(),
            "wss://agent.example.com/voice/ws/chat?webrtc_id=session_x"
        );
    }

    #[test]
    fn test_rejects_unsupported_bases() {
        for base in ["ftp://example.com", "not a url", "ws://example.com"] {
            assert!(
                matches!(Endpoints::new(base), Err(ConfigError::InvalidValue(_, _))),
                "{base} should be rejected"
            );
        }
    }
}
