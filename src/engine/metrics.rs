//! Network metrics collector.
//!
//! Queries every registered coin's daemon for a block template and derives
//! the network difficulty and block reward from it. Daemon calls run
//! concurrently with a per-call timeout; a coin whose daemon fails keeps
//! its last good values.

use anyhow::Result;
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::daemon::DaemonInfo;
use crate::registry::CoinRegistry;
use crate::types::{BlockTemplate, ProfitError};

/// Daemons report the coinbase value in 1e-8 coin units.
pub const COIN_BASE_UNITS: f64 = 1e8;

/// Difficulty-1 target used by scrypt-family coins.
pub const SCRYPT_DIFF1_TARGET: &str =
    "0000ffff00000000000000000000000000000000000000000000000000000000";

/// Difficulty-1 target used by Bitcoin and most other algorithms.
pub const BITCOIN_DIFF1_TARGET: &str =
    "00000000ffff0000000000000000000000000000000000000000000000000000";

const DIFFICULTY_DECIMALS: f64 = 1e9;

// ---------------------------------------------------------------------------
// Target arithmetic
// ---------------------------------------------------------------------------

/// Parse a big-endian hex target.
pub fn parse_target_hex(hex: &str) -> Result<BigUint, ProfitError> {
    let digits = hex.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);

    if digits.is_empty() {
        return Err(ProfitError::InvalidTarget("empty target".into()));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProfitError::InvalidTarget(format!("non-hex digit in {hex:?}")));
    }

    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| ProfitError::InvalidTarget(format!("unparseable target {hex:?}")))
}

/// Expand a compact `bits` encoding: the high byte is a base-256 exponent,
/// the low three bytes the mantissa.
pub fn target_from_bits(bits: &str) -> Result<BigUint, ProfitError> {
    let raw = bits.trim();
    let compact = u32::from_str_radix(raw.strip_prefix("0x").unwrap_or(raw), 16)
        .map_err(|e| ProfitError::InvalidTarget(format!("bad bits {bits:?}: {e}")))?;

    if compact & 0x0080_0000 != 0 {
        return Err(ProfitError::InvalidTarget(format!("negative bits {bits:?}")));
    }

    let mantissa = BigUint::from(compact & 0x007f_ffff);
    let exponent = (compact >> 24) as usize;
    Ok(if exponent >= 3 {
        mantissa << (8 * (exponent - 3))
    } else {
        mantissa >> (8 * (3 - exponent))
    })
}

/// Numeric target of a template: the explicit `target` field when present,
/// the compact `bits` otherwise.
pub fn target_of(template: &BlockTemplate) -> Result<BigUint, ProfitError> {
    let target = match (&template.target, &template.bits) {
        (Some(target), _) => parse_target_hex(target)?,
        (None, Some(bits)) => target_from_bits(bits)?,
        (None, None) => {
            return Err(ProfitError::InvalidTarget(
                "template has neither target nor bits".into(),
            ))
        }
    };

    if target.is_zero() {
        return Err(ProfitError::InvalidTarget("zero target".into()));
    }
    Ok(target)
}

/// `reference_unit / target`, rounded to 9 decimal places.
///
/// The integers are converted to `f64` only for the final division. A NaN
/// here leaves the coin unrated.
pub fn difficulty(reference_unit: &BigUint, target: &BigUint) -> f64 {
    let unit = reference_unit.to_f64().unwrap_or(f64::NAN);
    let target = target.to_f64().unwrap_or(f64::NAN);
    (unit / target * DIFFICULTY_DECIMALS).round() / DIFFICULTY_DECIMALS
}

/// Difficulty-1 target for an algorithm when none is configured.
pub fn default_reference_unit(algorithm: &str) -> &'static str {
    if algorithm.to_ascii_lowercase().starts_with("scrypt") {
        SCRYPT_DIFF1_TARGET
    } else {
        BITCOIN_DIFF1_TARGET
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkMetrics {
    pub difficulty: f64,
    /// Whole coins per block.
    pub reward: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsReport {
    pub queried: usize,
    pub updated: usize,
    pub failed: usize,
    /// Registered coins with no daemon configured.
    pub missing: usize,
}

pub struct NetworkMetricsCollector {
    /// Algorithm (lowercase) → parsed difficulty-1 target.
    reference_units: HashMap<String, BigUint>,
    /// Symbol (uppercase) → fixed block reward.
    reward_overrides: HashMap<String, f64>,
    request_timeout: Duration,
    max_concurrent_requests: usize,
}

impl NetworkMetricsCollector {
    pub fn new(
        reference_units: &HashMap<String, String>,
        reward_overrides: &HashMap<String, f64>,
        request_timeout: Duration,
        max_concurrent_requests: usize,
    ) -> Result<Self> {
        let mut units = HashMap::with_capacity(reference_units.len());
        for (algorithm, hex) in reference_units {
            let unit = parse_target_hex(hex).map_err(|e| {
                ProfitError::Config(format!("reference unit for {algorithm}: {e}"))
            })?;
            if unit.is_zero() {
                return Err(ProfitError::Config(format!(
                    "reference unit for {algorithm} must be positive"
                ))
                .into());
            }
            units.insert(algorithm.to_ascii_lowercase(), unit);
        }

        let overrides = reward_overrides
            .iter()
            .map(|(symbol, reward)| (symbol.to_ascii_uppercase(), *reward))
            .collect();

        Ok(Self {
            reference_units: units,
            reward_overrides: overrides,
            request_timeout,
            max_concurrent_requests,
        })
    }

    fn reference_unit(&self, algorithm: &str) -> Result<BigUint, ProfitError> {
        match self.reference_units.get(&algorithm.to_ascii_lowercase()) {
            Some(unit) => Ok(unit.clone()),
            None => parse_target_hex(default_reference_unit(algorithm)),
        }
    }

    /// Reward override for `symbol`, if one is configured.
    pub fn reward_override(&self, symbol: &str) -> Option<f64> {
        self.reward_overrides
            .get(&symbol.to_ascii_uppercase())
            .copied()
    }

    /// Difficulty and reward for one coin's template.
    pub fn evaluate(
        &self,
        algorithm: &str,
        symbol: &str,
        template: &BlockTemplate,
    ) -> Result<NetworkMetrics, ProfitError> {
        let target = target_of(template)?;
        let difficulty = difficulty(&self.reference_unit(algorithm)?, &target);

        let reward = match self.reward_override(symbol) {
            Some(fixed) => fixed,
            None => template.coinbase_value / COIN_BASE_UNITS,
        };

        Ok(NetworkMetrics { difficulty, reward })
    }

    /// Query every registered coin's daemon and write the results into the
    /// registry.
    pub async fn collect(
        &self,
        daemons: &HashMap<String, Box<dyn DaemonInfo>>,
        registry: &mut CoinRegistry,
    ) -> Result<MetricsReport> {
        let mut report = MetricsReport::default();
        let timeout = self.request_timeout;

        let mut targets = Vec::new();
        for coin in registry.coins() {
            match daemons.get(coin.symbol()) {
                Some(daemon) => targets.push((
                    coin.symbol().to_string(),
                    coin.algorithm().to_string(),
                    &**daemon,
                )),
                None => {
                    warn!(symbol = %coin.symbol(), "No daemon configured for coin");
                    report.missing += 1;
                }
            }
        }
        report.queried = targets.len();

        let results: Vec<_> = stream::iter(targets)
            .map(|(symbol, algorithm, daemon)| async move {
                let template = tokio::time::timeout(timeout, daemon.get_block_template()).await;
                (symbol, algorithm, template)
            })
            .buffer_unordered(self.max_concurrent_requests)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        for (symbol, algorithm, template) in results {
            let template = match template {
                Ok(Ok(t)) => t,
                Ok(Err(e)) => {
                    warn!(symbol = %symbol, error = %e, "Block template query failed");
                    report.failed += 1;
                    continue;
                }
                Err(_) => {
                    warn!(
                        symbol = %symbol,
                        timeout_secs = timeout.as_secs(),
                        "Block template query timed out"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let metrics = match self.evaluate(&algorithm, &symbol, &template) {
                Ok(m) => m,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Unusable block template");
                    report.failed += 1;
                    continue;
                }
            };

            let coin = registry
                .coin_mut(&symbol)
                .ok_or_else(|| ProfitError::Registry(format!("{symbol} vanished during metrics stage")))?;
            coin.difficulty = metrics.difficulty;
            coin.reward = metrics.reward;
            report.updated += 1;

            debug!(
                symbol = %symbol,
                difficulty = metrics.difficulty,
                reward = metrics.reward,
                "Network metrics updated"
            );
        }

        info!(
            updated = report.updated,
            failed = report.failed,
            missing = report.missing,
            "Network metrics collected"
        );

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
