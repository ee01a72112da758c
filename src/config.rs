use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Listen address (e.g., "127.0.0.1:4000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Tradable symbols, fixed for the process lifetime
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Price tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Per-connection outbound queue size before the client counts as lagging
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Server heartbeat period in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// CORS origins; empty means any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Random walk parameters
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// Price simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Lower bound applied after every step
    #[serde(default = "default_floor")]
    pub floor: Decimal,

    /// Largest absolute move per tick
    #[serde(default = "default_max_step")]
    pub max_step: Decimal,

    /// Inclusive lower bound of the seeded price
    #[serde(default = "default_initial_min")]
    pub initial_min: Decimal,

    /// Exclusive upper bound of the seeded price
    #[serde(default = "default_initial_max")]
    pub initial_max: Decimal,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            symbols: default_symbols(),
            tick_interval_ms: default_tick_interval_ms(),
            outbound_capacity: default_outbound_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
            allowed_origins: Vec::new(),
            pricing: PricingConfig::default(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            floor: default_floor(),
            max_step: default_max_step(),
            initial_min: default_initial_min(),
            initial_max: default_initial_max(),
        }
    }
}

// Default value functions for serde
fn default_bind_addr() -> String {
    "127.0.0.1:4000".to_string()
}

fn default_symbols() -> Vec<String> {
    ["GOOG", "TSLA", "AMZN", "META", "NVDA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_floor() -> Decimal {
    dec!(10)
}

fn default_max_step() -> Decimal {
    dec!(5)
}

fn default_initial_min() -> Decimal {
    dec!(100)
}

fn default_initial_max() -> Decimal {
    dec!(1000)
}

impl StreamConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            symbols: lookup("SYMBOLS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.symbols),
            tick_interval_ms: parse_or("TICK_INTERVAL_MS", &lookup, defaults.tick_interval_ms)?,
            outbound_capacity: parse_or("OUTBOUND_CAPACITY", &lookup, defaults.outbound_capacity)?,
            heartbeat_secs: parse_or("HEARTBEAT_SECS", &lookup, defaults.heartbeat_secs)?,
            allowed_origins: lookup("FRONTEND_URL")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            pricing: PricingConfig {
                floor: parse_or("PRICE_FLOOR", &lookup, defaults.pricing.floor)?,
                max_step: parse_or("PRICE_MAX_STEP", &lookup, defaults.pricing.max_step)?,
                initial_min: parse_or("PRICE_INITIAL_MIN", &lookup, defaults.pricing.initial_min)?,
                initial_max: parse_or("PRICE_INITIAL_MAX", &lookup, defaults.pricing.initial_max)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick_interval_ms", "must be greater than zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(invalid("outbound_capacity", "must be greater than zero"));
        }
        if self.heartbeat_secs == 0 {
            return Err(invalid("heartbeat_secs", "must be greater than zero"));
        }
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptyUniverse);
        }
        self.pricing.validate()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.floor <= Decimal::ZERO {
            return Err(invalid("pricing.floor", "must be positive"));
        }
        if self.max_step < Decimal::ZERO {
            return Err(invalid("pricing.max_step", "must not be negative"));
        }
        if self.initial_min >= self.initial_max {
            return Err(invalid("pricing.initial_min", "must be below initial_max"));
        }
        if self.initial_min < self.floor {
            return Err(invalid("pricing.initial_min", "must not be below the floor"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T, F>(key: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
