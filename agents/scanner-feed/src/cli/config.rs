//! Configuration module
//!
//! Handles loading and validating client configuration from TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::connection::protocol::{ClientRequest, Exchange};
use crate::connection::reconnect::Backoff;
use crate::connection::websocket::{validate_url, ConnectionControllerBuilder};
use crate::error::ClientError;

/// Main configuration structure for the feed client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Feed server connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Window sizes
    #[serde(default)]
    pub stream: StreamConfig,

    /// What to subscribe to once connected
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Feed server connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the feed server
    #[serde(default = "default_url")]
    pub url: String,

    /// Delay before reconnecting in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Timeout for the opening handshake in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Exponential backoff between failed attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Disabled means a fixed reconnect delay
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default)]
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Number of ticks kept for display
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Number of recent diagnostic records kept
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default = "default_exchange")]
    pub exchange: Exchange,

    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_url() -> String {
    "ws://127.0.0.1:8000/ws".to_string()
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_capacity() -> usize {
    20
}

fn default_diagnostics_capacity() -> usize {
    50
}

fn default_exchange() -> Exchange {
    Exchange::Crypto
}

fn default_tickers() -> Vec<String> {
    vec!["BTCUSD".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_secs: default_connect_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            tickers: default_tickers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            stream: StreamConfig::default(),
            subscription: SubscriptionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_url(&self.connection.url)?;

        if self.connection.reconnect_delay_ms == 0 {
            return Err(ClientError::Config(
                "connection.reconnect_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.connection.connect_timeout_secs == 0 {
            return Err(ClientError::Config(
                "connection.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.connection.backoff.multiplier < 1.0 {
            return Err(ClientError::Config(
                "connection.backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.stream.capacity == 0 {
            return Err(ClientError::Config("stream.capacity must be greater than 0".to_string()));
        }
        if self.stream.diagnostics_capacity == 0 {
            return Err(ClientError::Config(
                "stream.diagnostics_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Window capacity; falls back to the default for a zero value
    pub fn stream_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.stream.capacity).unwrap_or(crate::feed::window::DEFAULT_CAPACITY)
    }

    /// Controller builder carrying the connection settings
    pub fn controller_builder(&self) -> ConnectionControllerBuilder {
        let connection = &self.connection;
        let mut builder = ConnectionControllerBuilder::new(&connection.url)
            .reconnect_delay(Duration::from_millis(connection.reconnect_delay_ms))
            .connect_timeout(Duration::from_secs(connection.connect_timeout_secs));

        if connection.backoff.enabled {
            builder = builder.backoff(Backoff {
                max_delay: Duration::from_millis(connection.backoff.max_delay_ms),
                multiplier: connection.backoff.multiplier,
                jitter: connection.backoff.jitter,
            });
        }

        if let Some(capacity) = NonZeroUsize::new(self.stream.diagnostics_capacity) {
            builder = builder.diagnostics_capacity(capacity);
        }

        builder
    }

    /// The subscribe request sent on every open
    pub fn subscribe_request(&self) -> ClientRequest {
        ClientRequest::subscribe(self.subscription.exchange, self.subscription.tickers.iter().cloned())
    }
}
