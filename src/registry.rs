//! Coin registry.
//!
//! Groups configured coins by proof-of-work algorithm and owns every
//! `CoinStatus` for the lifetime of the process. Groups are computed once
//! at start-up; an algorithm with fewer than two coins has nothing to
//! switch between and is dropped along with its symbols.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::types::CoinStatus;

/// Minimum coins an algorithm needs to be worth switching.
pub const MIN_GROUP_SIZE: usize = 2;

/// Coins sharing one algorithm, in registration order.
#[derive(Debug, Clone)]
pub struct AlgorithmGroup {
    algorithm: String,
    coins: Vec<CoinStatus>,
}

impl AlgorithmGroup {
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn coins(&self) -> &[CoinStatus] {
        &self.coins
    }

    pub fn coins_mut(&mut self) -> &mut [CoinStatus] {
        &mut self.coins
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

/// Owner of the status table shared by the pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CoinRegistry {
    groups: Vec<AlgorithmGroup>,
    symbol_to_algorithm: HashMap<String, String>,
    pass: u64,
}

impl CoinRegistry {
    /// Build the registry from coins in configuration order.
    ///
    /// Duplicate symbols keep their first registration.
    pub fn new(coins: impl IntoIterator<Item = CoinStatus>) -> Self {
        let mut groups: Vec<AlgorithmGroup> = Vec::new();
        let mut symbol_to_algorithm = HashMap::new();

        for coin in coins {
            if symbol_to_algorithm.contains_key(coin.symbol()) {
                warn!(symbol = %coin.symbol(), "Duplicate coin symbol ignored");
                continue;
            }
            symbol_to_algorithm.insert(coin.symbol().to_string(), coin.algorithm().to_string());

            match groups.iter_mut().find(|g| g.algorithm == coin.algorithm()) {
                Some(group) => group.coins.push(coin),
                None => groups.push(AlgorithmGroup {
                    algorithm: coin.algorithm().to_string(),
                    coins: vec![coin],
                }),
            }
        }

        groups.retain(|group| {
            if group.len() >= MIN_GROUP_SIZE {
                return true;
            }
            debug!(
                algorithm = %group.algorithm,
                coins = group.len(),
                "Not enough coins to switch between, dropping algorithm"
            );
            for coin in &group.coins {
                symbol_to_algorithm.remove(coin.symbol());
            }
            false
        });

        info!(
            algorithms = groups.len(),
            coins = symbol_to_algorithm.len(),
            "Coin registry built"
        );

        Self {
            groups,
            symbol_to_algorithm,
            pass: 0,
        }
    }

    pub fn groups(&self) -> &[AlgorithmGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [AlgorithmGroup] {
        &mut self.groups
    }

    pub fn algorithm_of(&self, symbol: &str) -> Option<&str> {
        self.symbol_to_algorithm.get(symbol).map(String::as_str)
    }

    /// Every registered coin, group by group, in registration order.
    pub fn coins(&self) -> impl Iterator<Item = &CoinStatus> {
        self.groups.iter().flat_map(|g| g.coins.iter())
    }

    pub fn coins_mut(&mut self) -> impl Iterator<Item = &mut CoinStatus> {
        self.groups.iter_mut().flat_map(|g| g.coins.iter_mut())
    }

    pub fn coin(&self, symbol: &str) -> Option<&CoinStatus> {
        let algorithm = self.algorithm_of(symbol)?;
        self.groups
            .iter()
            .find(|g| g.algorithm == algorithm)?
            .coins
            .iter()
            .find(|c| c.symbol() == symbol)
    }

    pub fn coin_mut(&mut self, symbol: &str) -> Option<&mut CoinStatus> {
        let algorithm = self.symbol_to_algorithm.get(symbol)?;
        self.groups
            .iter_mut()
            .find(|g| &g.algorithm == algorithm)?
            .coins
            .iter_mut()
            .find(|c| c.symbol() == symbol)
    }

    /// Number of coins eligible for switching.
    pub fn len(&self) -> usize {
        self.symbol_to_algorithm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Start a new pass: bump the pass counter and clear the derived
    /// per-pass fields. Market and network data are left for the stages
    /// to overwrite.
    pub fn begin_pass(&mut self) -> u64 {
        self.pass += 1;
        for coin in self.coins_mut() {
            coin.rates = None;
            coin.best_score = None;
        }
        self.pass
    }

    pub fn current_pass(&self) -> u64 {
        self.pass
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
