//! Application configuration.
//!
//! Defaults are code-level; a `config.toml` next to the binary and
//! `PULSE_TRADE_*` environment variables override them (nested keys join
//! with `__`, e.g. `PULSE_TRADE_SCANNER__INTERVAL_SECS=15`).

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub scanner: ScannerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub ws_url: String,
    /// Run against the in-process paper broker instead of the live feed.
    pub paper: bool,
    /// Bounded wait for any single outbound call, in seconds.
    pub call_timeout_secs: u64,
    pub breaker: CircuitBreakerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.example-broker.com/websockets/v3".to_string(),
            paper: true,
            call_timeout_secs: 30,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Symbols scanned each tick.
    pub symbols: Vec<String>,
    pub interval_secs: u64,
    /// Minimum advisor confidence to accept an opportunity.
    pub min_confidence: f64,
    /// Debounce TTL for `(user, symbol)` dispatch keys, in seconds.
    pub debounce_ttl_secs: u64,
    /// Candidates older than this are discarded unexecuted.
    pub signal_max_age_secs: u64,
    /// Advisor endpoint; indicator fallback is used when unset or failing.
    pub advisor_url: Option<String>,
    pub advisor_timeout_secs: u64,
    pub advisor_breaker: CircuitBreakerConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["R_50".to_string(), "R_100".to_string()],
            interval_secs: 30,
            min_confidence: 0.7,
            debounce_ttl_secs: 300,
            signal_max_age_secs: 300,
            advisor_url: None,
            advisor_timeout_secs: 30,
            advisor_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between signal dispatch and execution, allowing a final
    /// staleness check.
    pub dispatch_delay_secs: u64,
    pub monitor_interval_secs: u64,
    /// Delay before the first supervision tick of a new position.
    pub monitor_initial_delay_secs: u64,
    pub submit_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_delay_secs: 5,
            monitor_interval_secs: 10,
            monitor_initial_delay_secs: 2,
            submit_retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from defaults, `config.toml`, and environment.
    ///
    /// # Errors
    /// Returns an error if a provided file or environment value fails to
    /// parse into the expected shape.
    pub fn load() -> anyhow::Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("PULSE_TRADE_").split("__"))
            .extract()?;
        Ok(config)
    }
}
