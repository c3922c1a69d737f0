//! Switch decision engine.
//!
//! For each algorithm group, scores every coin × exchange × quote cell and
//! picks the highest. Cells are visited in registration order (coins),
//! `ExchangeKind` order (exchanges) and `QuoteCurrency` order (quotes);
//! on equal scores the first cell visited wins.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::control::DirectiveSink;
use crate::registry::CoinRegistry;
use crate::types::{ExchangeKind, MarketSnapshot, MiningRates, QuoteCurrency, SwitchDirective};

/// Score of one cell in the primary currency.
///
/// `None` when the cell has no weighted bid, or is quoted in a secondary
/// currency without a cross rate. Such cells are skipped, never scored 0.
pub fn score_cell(cell: &MarketSnapshot, quote: QuoteCurrency, rates: &MiningRates) -> Option<f64> {
    let weighted_bid = cell.weighted_bid?;
    let cross_rate = if quote.is_primary() {
        1.0
    } else {
        cell.cross_rate?
    };

    let score = weighted_bid * rates.coins_per_hash_per_hour * cross_rate;
    score.is_finite().then_some(score)
}

/// Winner of one algorithm group for the current pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchDecision {
    pub algorithm: String,
    pub coin_name: String,
    pub symbol: String,
    pub exchange: ExchangeKind,
    pub quote: QuoteCurrency,
    pub score: f64,
    /// The winning cell was written by an earlier pass.
    pub stale: bool,
}

impl SwitchDecision {
    pub fn directive(&self) -> SwitchDirective {
        SwitchDirective::coin_switch(&self.coin_name, &self.algorithm)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmitReport {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct SwitchDecisionEngine;

impl SwitchDecisionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Pick a winner per group and record each coin's best score.
    ///
    /// Groups without a single scorable cell produce no decision.
    pub fn decide(&self, registry: &mut CoinRegistry) -> Vec<SwitchDecision> {
        let pass = registry.current_pass();
        let mut decisions = Vec::new();

        for group in registry.groups_mut() {
            let algorithm = group.algorithm().to_string();
            let mut winner: Option<SwitchDecision> = None;

            for coin in group.coins_mut() {
                let Some(rates) = coin.rates else {
                    continue;
                };
                let mut coin_best: Option<f64> = None;

                for (exchange, cells) in &coin.exchange_info {
                    for (quote, cell) in cells {
                        let Some(score) = score_cell(cell, *quote, &rates) else {
                            continue;
                        };

                        debug!(
                            symbol = %coin.symbol(),
                            exchange = %exchange,
                            quote = %quote,
                            score,
                            stale = cell.pass < pass,
                            "Cell scored"
                        );

                        if coin_best.map_or(true, |best| score > best) {
                            coin_best = Some(score);
                        }
                        if winner.as_ref().map_or(true, |w| score > w.score) {
                            winner = Some(SwitchDecision {
                                algorithm: algorithm.clone(),
                                coin_name: coin.name().to_string(),
                                symbol: coin.symbol().to_string(),
                                exchange: *exchange,
                                quote: *quote,
                                score,
                                stale: cell.pass < pass,
                            });
                        }
                    }
                }

                coin.best_score = coin_best;
            }

            match winner {
                Some(decision) => {
                    if decision.stale {
                        warn!(
                            algorithm = %decision.algorithm,
                            coin = %decision.coin_name,
                            exchange = %decision.exchange,
                            "Winning cell carries data from an earlier pass"
                        );
                    }
                    info!(
                        algorithm = %decision.algorithm,
                        coin = %decision.coin_name,
                        exchange = %decision.exchange,
                        quote = %decision.quote,
                        score = decision.score,
                        "Most profitable coin selected"
                    );
                    decisions.push(decision);
                }
                None => debug!(algorithm = %algorithm, "No scorable coin, insufficient data"),
            }
        }

        decisions
    }

    /// Send one directive per decision. A failed send is logged and the
    /// remaining directives are still sent.
    pub async fn emit(&self, decisions: &[SwitchDecision], sink: &dyn DirectiveSink) -> EmitReport {
        let mut report = EmitReport::default();

        for decision in decisions {
            match sink.send(&decision.directive()).await {
                Ok(()) => {
                    report.sent += 1;
                    info!(
                        algorithm = %decision.algorithm,
                        coin = %decision.coin_name,
                        "Switch directive sent"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        algorithm = %decision.algorithm,
                        coin = %decision.coin_name,
                        error = %e,
                        "Failed to send switch directive"
                    );
                }
            }
        }

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
