//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional JSON
//! file, `TICKER_*` environment variables, then command-line flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use ticker_core::Currency;
use ticker_feeds::{parse_endpoint, validate_symbols, FeedConfig, ReconnectPolicy};

pub const ENV_ENDPOINT: &str = "TICKER_ENDPOINT";
pub const ENV_CURRENCY: &str = "TICKER_CURRENCY";
pub const ENV_SYMBOLS: &str = "TICKER_SYMBOLS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Realtime feed WebSocket URL.
    pub endpoint: String,
    /// Currency context for all watched symbols.
    pub currency: String,
    /// Symbols to watch.
    pub symbols: Vec<String>,
    /// Logging level.
    pub log_level: String,
    /// Seconds between price summaries; 0 disables them.
    pub summary_interval_secs: u64,
    /// Last known non-realtime prices, shown until live data arrives.
    pub fallback_prices: HashMap<String, f64>,
    pub feed: FeedSettings,
    pub reconnect: ReconnectSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8765/prices".to_string(),
            currency: "USD".to_string(),
            symbols: vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            log_level: "info".to_string(),
            summary_interval_secs: 30,
            fallback_prices: HashMap::new(),
            feed: FeedSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `TICKER_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.endpoint = endpoint.trim().to_string();
        }
        if let Some(currency) = get(ENV_CURRENCY) {
            self.currency = currency.trim().to_string();
        }
        if let Some(symbols) = get(ENV_SYMBOLS) {
            self.symbols = split_symbols(&symbols);
        }
    }

    /// Check everything the realtime layer would reject later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.endpoint).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Currency::new(&self.currency).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.symbols.is_empty() {
            return Err(ConfigError::Invalid("no symbols to watch".to_string()));
        }
        validate_symbols(self.symbols.iter().cloned())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            ws_url: self.endpoint.clone(),
            ping_interval_ms: self.feed.ping_interval_ms,
            ping_timeout_ms: self.feed.ping_timeout_ms,
            stale_timeout_ms: self.feed.stale_timeout_ms,
            connect_timeout_ms: self.feed.connect_timeout_ms,
            channel_capacity: self.feed.channel_capacity,
        }
    }
}

/// Connection timing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub stale_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        let defaults = FeedConfig::default();
        Self {
            ping_interval_ms: defaults.ping_interval_ms,
            ping_timeout_ms: defaults.ping_timeout_ms,
            stale_timeout_ms: defaults.stale_timeout_ms,
            connect_timeout_ms: defaults.connect_timeout_ms,
            channel_capacity: defaults.channel_capacity,
        }
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 retries forever.
    pub max_retries: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay_ms,
            max_delay_ms: policy.max_delay_ms,
            max_retries: policy.max_retries,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        ReconnectPolicy {
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            max_retries: settings.max_retries,
            ..Default::default()
        }
    }
}

/// Split a comma-separated symbol list, dropping blanks.
pub fn split_symbols(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
