//! Relay connection settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Settings for one terminal relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket base URL; the terminal path is appended to it.
    pub endpoint: String,
    /// Bearer token presented during the handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Deadline used when an expiry warning does not say how long is left.
    pub expiry_grace_secs: u64,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".to_string(),
            token: None,
            expiry_grace_secs: 60,
            event_capacity: 256,
        }
    }
}

impl RelayConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_secs(self.expiry_grace_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(RelayError::InvalidEndpoint(format!(
                "expected ws:// or wss:// URL, got {}",
                self.endpoint
            )));
        }
        if self.event_capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Join the endpoint with a terminal path.
    pub fn url_for(&self, path: &str) -> Result<String> {
        let unusable = |c: char| c.is_whitespace() || c.is_control();
        if !path.starts_with('/') || path.contains(unusable) {
            return Err(RelayError::InvalidPath(path.to_string()));
        }
        self.validate()?;
        Ok(format!("{}{}", self.endpoint.trim_end_matches('/'), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoint_and_path() {
        let config = RelayConfig::new("wss://console.example.com/");
        assert_eq!(
            config.url_for("/ws/v1/terminal/c/p").unwrap(),
            "wss://console.example.com/ws/v1/terminal/c/p"
        );
    }

    #[test]
    fn rejects_relative_or_empty_paths() {
        let config = RelayConfig::default();
        assert!(matches!(config.url_for(""), Err(RelayError::InvalidPath(_))));
        assert!(matches!(
            config.url_for("ws/v1"),
            Err(RelayError::InvalidPath(_))
        ));
    }

    #[test]
    fn rejects_paths_with_spaces_or_controls() {
        let config = RelayConfig::default();
        for path in ["/ws/v1/terminal/c/pod a", "/ws/v1/terminal/c/p\n", "/ws\t/v1"] {
            assert!(
                matches!(config.url_for(path), Err(RelayError::InvalidPath(_))),
                "{path:?}"
            );
        }
    }

    #[test]
    fn zero_capacity_is_a_config_error() {
        let config = RelayConfig {
            event_capacity: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_http_endpoint() {
        let config = RelayConfig::new("http://localhost");
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: RelayConfig = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert_eq!(config.endpoint, "ws://127.0.0.1:8080");
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(config.expiry_grace(), Duration::from_secs(60));
    }
}
