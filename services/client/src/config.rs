use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all client configuration, usually loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Backend base address, `http` or `https`.
    pub base_url: String,
    pub ice_servers: Vec<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_after_error: Duration,
    pub reconnect_after_close: Duration,
    /// Whether the best-effort SSE text path is opened alongside the WebSocket.
    pub fallback_stream: bool,
    pub log_level: Level,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            heartbeat_interval: Duration::from_secs(30),
            reconnect_after_error: Duration::from_millis(5000),
            reconnect_after_close: Duration::from_millis(2000),
            fallback_stream: true,
            log_level: Level::INFO,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let base_url =
            std::env::var("VOXLINE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "VOXLINE_BASE_URL".to_string(),
                format!("'{}' must start with http:// or https://", base_url),
            ));
        }

        let ice_servers = match std::env::var("VOXLINE_ICE_SERVERS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|server| !server.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => vec![DEFAULT_ICE_SERVER.to_string()],
        };

        let heartbeat_interval =
            Duration::from_secs(parse_number("VOXLINE_HEARTBEAT_SECS", 30)?);
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "VOXLINE_HEARTBEAT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let reconnect_after_error =
            Duration::from_millis(parse_number("VOXLINE_RECONNECT_ERROR_MS", 5000)?);
        let reconnect_after_close =
            Duration::from_millis(parse_number("VOXLINE_RECONNECT_CLOSE_MS", 2000)?);

        let fallback_stream = match std::env::var("VOXLINE_FALLBACK_STREAM") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "VOXLINE_FALLBACK_STREAM".to_string(),
                        format!("'{}' is not a boolean", raw),
                    ));
                }
            },
            Err(_) => true,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            base_url,
            ice_servers,
            heartbeat_interval,
            reconnect_after_error,
            reconnect_after_close,
            fallback_stream,
            log_level,
        })
    }
}

fn parse_number(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue(var.to_string(), format!("'{}': {}", raw, e))
        }),
        Err(_) => Ok(default),
    }
}
