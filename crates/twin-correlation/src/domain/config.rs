//! Client configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// How change events are handed to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One bounded queue and worker per subscription; each listener sees
    /// the events for its key in arrival order and a slow listener only
    /// delays itself. Invocations are bounded by `listener_timeout`.
    #[default]
    Ordered,
    /// Every listener invocation runs in its own task. No ordering between
    /// listeners or events.
    Isolated,
}

impl DispatchMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ordered" => Some(Self::Ordered),
            "isolated" => Some(Self::Isolated),
            _ => None,
        }
    }
}

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied to requests sent without an explicit timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// How often the expiry sweeper scans for overdue requests
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Upper bound for one listener invocation
    #[serde(with = "humantime_serde")]
    pub listener_timeout: Duration,
    /// Listener concurrency model
    pub dispatch_mode: DispatchMode,
    /// Max subscriptions per entity key
    pub max_subscriptions_per_key: usize,
    /// Events buffered per listener in ordered mode before new ones are dropped
    pub listener_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(100),
            listener_timeout: Duration::from_secs(5),
            dispatch_mode: DispatchMode::Ordered,
            max_subscriptions_per_key: 1024,
            listener_queue_capacity: 1024,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// - `TWIN_DEFAULT_TIMEOUT_MS`
    /// - `TWIN_SWEEP_INTERVAL_MS`
    /// - `TWIN_LISTENER_TIMEOUT_MS`
    /// - `TWIN_DISPATCH_MODE` (`ordered` or `isolated`)
    /// - `TWIN_LISTENER_QUEUE_CAPACITY`
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: env_millis("TWIN_DEFAULT_TIMEOUT_MS")
                .unwrap_or(defaults.default_timeout),
            sweep_interval: env_millis("TWIN_SWEEP_INTERVAL_MS")
                .unwrap_or(defaults.sweep_interval),
            listener_timeout: env_millis("TWIN_LISTENER_TIMEOUT_MS")
                .unwrap_or(defaults.listener_timeout),
            dispatch_mode: env::var("TWIN_DISPATCH_MODE")
                .ok()
                .and_then(|v| DispatchMode::parse(&v))
                .unwrap_or(defaults.dispatch_mode),
            max_subscriptions_per_key: defaults.max_subscriptions_per_key,
            listener_queue_capacity: env::var("TWIN_LISTENER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.listener_queue_capacity),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }
        if self.listener_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "listener_timeout cannot be 0".into(),
            ));
        }
        if self.max_subscriptions_per_key == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_subscriptions_per_key cannot be 0".into(),
            ));
        }
        if self.listener_queue_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "listener_queue_capacity cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}
