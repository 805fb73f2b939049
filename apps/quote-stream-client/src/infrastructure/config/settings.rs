//! Client Configuration Settings
//!
//! Configuration types for the quote stream client, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::SessionSettings;
use crate::domain::execution_log::DEFAULT_EXECUTION_CAPACITY;

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Bus endpoint path appended to the base URL.
    pub ws_path: String,
    /// Heart-beat interval offered in both directions.
    pub heartbeat: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ws_path: "/ws".to_string(),
            heartbeat: Duration::from_millis(4000),
            reconnect_delay: Duration::from_millis(5000),
        }
    }
}

/// Subscription behaviour settings.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Poll interval while a subscription waits for a connection.
    pub subscribe_retry: Duration,
    /// Maximum executions retained.
    pub execution_capacity: usize,
    /// Await REST enable before opening topics.
    pub sequenced_enable: bool,
    /// Re-open topics after a reconnect.
    pub resubscribe_on_reconnect: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            subscribe_retry: Duration::from_millis(1000),
            execution_capacity: DEFAULT_EXECUTION_CAPACITY,
            sequenced_enable: false,
            resubscribe_on_reconnect: false,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL (`http(s)://host[:port]`).
    pub api_base_url: String,
    /// REST request timeout.
    pub request_timeout: Duration,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Subscription behaviour settings.
    pub subscription: SubscriptionSettings,
    /// Ticker the binary subscribes to on startup.
    pub ticker: Option<String>,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the base URL.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(10),
            stream: StreamSettings::default(),
            subscription: SubscriptionSettings::default(),
            ticker: None,
            health_port: 0,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or the
    /// base URL is not an http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = std::env::var("QUOTE_API_BASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("QUOTE_API_BASE_URL".to_string()))?;

        if api_base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("QUOTE_API_BASE_URL".to_string()));
        }

        let defaults = Self::new(api_base_url.trim());

        let stream = StreamSettings {
            ws_path: std::env::var("QUOTE_STREAM_WS_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.stream.ws_path),
            heartbeat: parse_env_duration_millis(
                "QUOTE_STREAM_HEARTBEAT_MS",
                defaults.stream.heartbeat,
            ),
            reconnect_delay: parse_env_duration_millis(
                "QUOTE_STREAM_RECONNECT_DELAY_MS",
                defaults.stream.reconnect_delay,
            ),
        };

        let subscription = SubscriptionSettings {
            subscribe_retry: parse_env_duration_millis(
                "QUOTE_STREAM_SUBSCRIBE_RETRY_MS",
                defaults.subscription.subscribe_retry,
            ),
            execution_capacity: parse_env_usize(
                "QUOTE_STREAM_EXECUTION_CAPACITY",
                defaults.subscription.execution_capacity,
            ),
            sequenced_enable: parse_env_bool(
                "QUOTE_STREAM_SEQUENCED_ENABLE",
                defaults.subscription.sequenced_enable,
            ),
            resubscribe_on_reconnect: parse_env_bool(
                "QUOTE_STREAM_RESUBSCRIBE_ON_RECONNECT",
                defaults.subscription.resubscribe_on_reconnect,
            ),
        };

        let config = Self {
            request_timeout: parse_env_duration_secs(
                "QUOTE_STREAM_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
            stream,
            subscription,
            ticker: std::env::var("QUOTE_STREAM_TICKER")
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            health_port: parse_env_u16("QUOTE_STREAM_HEALTH_PORT", defaults.health_port),
            api_base_url: defaults.api_base_url,
        };

        config.stream_url()?;
        Ok(config)
    }

    /// WebSocket URL of the message bus.
    ///
    /// `http` maps to `ws` and `https` to `wss`; `ws`/`wss` base URLs are
    /// used as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL has an unsupported scheme.
    pub fn stream_url(&self) -> Result<String, ConfigError> {
        let base = &self.api_base_url;
        let swapped = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.clone()
        } else {
            return Err(ConfigError::InvalidBaseUrl(base.clone()));
        };

        let path = &self.stream.ws_path;
        if path.starts_with('/') {
            Ok(format!("{swapped}{path}"))
        } else {
            Ok(format!("{swapped}/{path}"))
        }
    }

    /// Host (with port) of the base URL, used for the STOMP `host` header.
    #[must_use]
    pub fn host(&self) -> &str {
        let without_scheme = self
            .api_base_url
            .split_once("://")
            .map_or(self.api_base_url.as_str(), |(_, rest)| rest);
        without_scheme
            .split(['/', '?'])
            .next()
            .unwrap_or(without_scheme)
    }

    /// Session behaviour derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            execution_capacity: self.subscription.execution_capacity,
            subscribe_retry: self.subscription.subscribe_retry,
            sequenced_enable: self.subscription.sequenced_enable,
            resubscribe_on_reconnect: self.subscription.resubscribe_on_reconnect,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Base URL scheme is not http, https, ws or wss.
    #[error("unsupported base URL: {0}")]
    InvalidBaseUrl(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
