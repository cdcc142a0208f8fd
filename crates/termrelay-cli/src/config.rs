//! Config file handling.
//!
//! ```toml
//! [relay]
//! endpoint = "wss://console.example.com"
//! token = "..."
//! expiry_grace_secs = 60
//!
//! [log]
//! filter = "termrelay=debug"
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use termrelay_client::RelayConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub relay: RelayConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "termrelay=info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command-line and environment overrides.
    pub fn overlay(mut self, endpoint: Option<String>, token: Option<String>) -> Self {
        if let Some(endpoint) = endpoint {
            self.relay.endpoint = endpoint;
        }
        if let Some(token) = token {
            self.relay.token = Some(token);
        }
        self
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
