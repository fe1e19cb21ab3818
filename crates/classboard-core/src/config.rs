//! Client configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default port of the whiteboard socket server.
pub const DEFAULT_WHITEBOARD_PORT: u16 = 5000;
/// Default port of the audio relay.
pub const DEFAULT_AUDIO_PORT: u16 = 8000;
/// Reconnect attempts before the transport gives up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 50;
/// Fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
/// Timeout for a single TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;
/// Resolution PDF pages are rasterized at.
pub const DEFAULT_RENDER_DPI: u32 = 300;

/// Settings for connecting to a classroom server.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```json
/// { "server_host": "192.168.1.20", "reconnect_attempts": 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP of the classroom server.
    pub server_host: String,
    pub whiteboard_port: u16,
    pub audio_port: u16,
    /// Bounded number of automatic reconnect attempts.
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// DPI handed to the page rasterizer.
    pub render_dpi: u32,
    /// How often the owner loop drains inbound events.
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            whiteboard_port: DEFAULT_WHITEBOARD_PORT,
            audio_port: DEFAULT_AUDIO_PORT,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            render_dpi: DEFAULT_RENDER_DPI,
            poll_interval_ms: 16,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given host with default settings.
    pub fn new(server_host: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            ..Self::default()
        }
    }

    /// Parse a config from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    #[must_use]
    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_ports(mut self, whiteboard: u16, audio: u16) -> Self {
        self.whiteboard_port = whiteboard;
        self.audio_port = audio;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// WebSocket URL of the whiteboard server.
    pub fn whiteboard_url(&self) -> Result<Url, ConfigError> {
        let raw = format!("ws://{}:{}/", self.server_host, self.whiteboard_port);
        Url::parse(&raw).map_err(|e| ConfigError::Invalid(format!("{raw}: {e}")))
    }

    /// Check the settings that would otherwise fail late.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Invalid("server_host is empty".to_string()));
        }
        if self.whiteboard_port == 0 || self.audio_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be non-zero".to_string()));
        }
        if self.render_dpi == 0 {
            return Err(ConfigError::Invalid("render_dpi must be non-zero".to_string()));
        }
        self.whiteboard_url()?;
        Ok(())
    }
}
