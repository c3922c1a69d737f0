//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (daemon RPC passwords) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;

use crate::types::{ExchangeKind, ProfitError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub switch: SwitchConfig,
    pub control: ControlConfig,
    #[serde(default)]
    pub exchanges: ExchangesConfig,
    /// Symbol → fixed block reward, for coins whose daemon misreports it.
    #[serde(default)]
    pub reward_overrides: HashMap<String, f64>,
    /// Algorithm → difficulty-1 target as hex.
    #[serde(default)]
    pub reference_units: HashMap<String, String>,
    #[serde(default)]
    pub coins: Vec<CoinConfig>,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwitchConfig {
    pub interval_secs: u64,
    /// Fraction of the best bid that bounds the depth-weighted bid.
    pub depth: f64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_concurrent_requests() -> usize {
    8
}

impl SwitchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Where switch directives go.
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_control_host")]
    pub host: String,
    pub port: u16,
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExchangesConfig {
    #[serde(default)]
    pub poloniex: ExchangeConfig,
    #[serde(default)]
    pub crex24: ExchangeConfig,
    #[serde(default)]
    pub stex: ExchangeConfig,
    #[serde(default)]
    pub bittrex: ExchangeConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Override for the exchange's public API root.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ExchangesConfig {
    pub fn get(&self, kind: ExchangeKind) -> &ExchangeConfig {
        match kind {
            ExchangeKind::Poloniex => &self.poloniex,
            ExchangeKind::Crex24 => &self.crex24,
            ExchangeKind::Stex => &self.stex,
            ExchangeKind::Bittrex => &self.bittrex,
        }
    }

    /// Enabled exchanges in run order.
    pub fn enabled(&self) -> Vec<ExchangeKind> {
        ExchangeKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).enabled)
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoinConfig {
    pub name: String,
    pub symbol: String,
    pub algorithm: String,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Name of the env var holding the RPC password.
    #[serde(default)]
    pub password_env: Option<String>,
}

impl DaemonConfig {
    /// Resolve the RPC password, if one is configured.
    pub fn password(&self) -> Result<Option<SecretString>> {
        match &self.password_env {
            Some(env) => Ok(Some(SecretString::new(AppConfig::resolve_env(env)?))),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

fn default_dashboard_port() -> u16 {
    8081
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_dashboard_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to load config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ProfitError> {
        let s = &self.switch;
        if !(s.depth > 0.0 && s.depth <= 1.0) {
            return Err(ProfitError::Config(format!(
                "switch.depth must be in (0, 1], got {}",
                s.depth
            )));
        }
        if s.interval_secs == 0 {
            return Err(ProfitError::Config("switch.interval_secs must be > 0".into()));
        }
        if s.request_timeout_secs == 0 {
            return Err(ProfitError::Config(
                "switch.request_timeout_secs must be > 0".into(),
            ));
        }
        if s.max_concurrent_requests == 0 {
            return Err(ProfitError::Config(
                "switch.max_concurrent_requests must be > 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for coin in &self.coins {
            if !seen.insert(coin.symbol.to_ascii_uppercase()) {
                return Err(ProfitError::Config(format!(
                    "duplicate coin symbol: {}",
                    coin.symbol
                )));
            }
        }

        for (symbol, reward) in &self.reward_overrides {
            if !(reward.is_finite() && *reward >= 0.0) {
                return Err(ProfitError::Config(format!(
                    "reward override for {symbol} must be a non-negative number"
                )));
            }
        }

        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
