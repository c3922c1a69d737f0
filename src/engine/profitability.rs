//! Profitability calculator.
//!
//! Converts a coin's difficulty and block reward into the expected payout
//! per reference hash rate unit per hour. Prices play no part here; the
//! decision engine multiplies these rates by the market data.

use tracing::debug;

use crate::registry::CoinRegistry;
use crate::types::MiningRates;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Hash rate unit the rates are expressed in (1 MH/s).
pub const HASH_RATE_REFERENCE_UNIT: f64 = 1e6;

/// Hashes needed on average to find a block at difficulty 1.
const HASHES_PER_DIFFICULTY: f64 = 4_294_967_296.0;

/// Expected blocks and coins per reference hash rate unit.
///
/// `None` for a non-positive or non-finite difficulty, which would
/// otherwise produce an infinite or negative yield.
pub fn mining_rates(difficulty: f64, reward: f64) -> Option<MiningRates> {
    if !(difficulty > 0.0 && difficulty.is_finite()) || !reward.is_finite() {
        return None;
    }

    let blocks_per_hash_per_hour =
        SECONDS_PER_DAY / (difficulty * HASHES_PER_DIFFICULTY / HASH_RATE_REFERENCE_UNIT);

    Some(MiningRates {
        blocks_per_hash_per_hour,
        coins_per_hash_per_hour: reward * blocks_per_hash_per_hour,
    })
}

#[derive(Debug, Default)]
pub struct ProfitabilityCalculator;

impl ProfitabilityCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Recompute rates for every coin. Returns how many coins have rates.
    pub fn apply(&self, registry: &mut CoinRegistry) -> usize {
        let mut rated = 0;
        for coin in registry.coins_mut() {
            coin.rates = mining_rates(coin.difficulty, coin.reward);
            match coin.rates {
                Some(rates) => {
                    rated += 1;
                    debug!(
                        symbol = %coin.symbol(),
                        blocks = rates.blocks_per_hash_per_hour,
                        coins = rates.coins_per_hash_per_hour,
                        "Mining rates computed"
                    );
                }
                None => debug!(
                    symbol = %coin.symbol(),
                    difficulty = coin.difficulty,
                    "No usable difficulty, coin not rated"
                ),
            }
        }
        rated
    }
}
