//! Market aggregator.
//!
//! Runs one exchange through two stages and writes the results into the
//! coin registry:
//!
//! 1. **Ticker**: one ticker fetch. Every registered coin gets a fresh
//!    snapshot for each quote currency the exchange lists it in.
//! 2. **Depth**: for every fresh cell with a positive bid, the order book
//!    is fetched (concurrently, bounded) and reduced to a volume-weighted
//!    bid over the levels priced at or above `bid × depth_factor`.
//!
//! A failed ticker leaves the exchange's previous cells untouched; a
//! failed order book leaves that one cell without a weighted bid.

use anyhow::Result;
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::exchanges::MarketSource;
use crate::registry::CoinRegistry;
use crate::types::{
    BidLevel, ExchangeKind, MarketSnapshot, ProfitError, QuoteCurrency, TickerSnapshot,
};

// ---------------------------------------------------------------------------
// Depth weighting
// ---------------------------------------------------------------------------

/// Result of reducing a bid book against a reference bid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthWeighting {
    /// Sum of `quantity × price` over qualifying levels.
    pub depth: f64,
    pub quantity: f64,
    /// `depth / quantity`, or `None` when no level qualified.
    pub weighted_bid: Option<f64>,
}

/// Volume-weighted bid over the levels priced at or above
/// `reference_bid × depth_factor`.
///
/// Levels below the limit count towards neither sum. Ordering of the
/// levels doesn't matter.
pub fn weighted_bid(levels: &[BidLevel], reference_bid: f64, depth_factor: f64) -> DepthWeighting {
    let limit = reference_bid * depth_factor;

    let (depth, quantity) = levels
        .iter()
        .filter(|l| l.price >= limit && l.quantity > 0.0)
        .fold((0.0, 0.0), |(value, qty), l| {
            (value + l.quantity * l.price, qty + l.quantity)
        });

    DepthWeighting {
        depth,
        quantity,
        weighted_bid: (quantity > 0.0).then(|| depth / quantity),
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub depth_factor: f64,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

/// Outcome of one exchange's run within a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub exchange: ExchangeKind,
    pub ticker_ok: bool,
    /// Coin × quote cells written from the ticker.
    pub cells_updated: usize,
    pub depth_requested: usize,
    /// Cells that ended up with a weighted bid.
    pub depth_weighted: usize,
    pub depth_failed: usize,
}

impl SourceReport {
    fn new(exchange: ExchangeKind) -> Self {
        Self {
            exchange,
            ticker_ok: false,
            cells_updated: 0,
            depth_requested: 0,
            depth_weighted: 0,
            depth_failed: 0,
        }
    }
}

/// One order book to fetch in the depth stage.
#[derive(Debug, Clone, PartialEq)]
struct DepthRequest {
    symbol: String,
    quote: QuoteCurrency,
    reference_bid: f64,
}

pub struct MarketAggregator {
    settings: AggregatorSettings,
}

impl MarketAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self { settings }
    }

    /// Run the ticker and depth stages for one exchange.
    ///
    /// Per-exchange and per-pair failures are logged and reported, not
    /// returned; `Err` means the registry itself is inconsistent.
    pub async fn collect(
        &self,
        source: &dyn MarketSource,
        registry: &mut CoinRegistry,
    ) -> Result<SourceReport> {
        let kind = source.kind();
        let mut report = SourceReport::new(kind);
        let timeout = self.settings.request_timeout;

        // 1. Ticker stage
        let ticker = match tokio::time::timeout(timeout, source.fetch_ticker()).await {
            Ok(Ok(ticker)) => ticker,
            Ok(Err(e)) => {
                warn!(exchange = %kind, error = %e, "Ticker fetch failed, keeping previous data");
                return Ok(report);
            }
            Err(_) => {
                warn!(
                    exchange = %kind,
                    timeout_secs = timeout.as_secs(),
                    "Ticker fetch timed out, keeping previous data"
                );
                return Ok(report);
            }
        };
        report.ticker_ok = true;

        let requests = Self::apply_ticker(kind, &ticker, registry);
        report.cells_updated = registry
            .coins()
            .filter_map(|c| c.exchange_info.get(&kind))
            .map(|cells| cells.len())
            .sum();
        report.depth_requested = requests.len();

        if requests.is_empty() {
            debug!(exchange = %kind, "No markets with a positive bid, skipping depth stage");
            return Ok(report);
        }

        // 2. Depth stage
        let results: Vec<_> = stream::iter(requests)
            .map(|req| async move {
                let book = tokio::time::timeout(
                    timeout,
                    source.fetch_order_book(req.quote, &req.symbol),
                )
                .await;
                (req, book)
            })
            .buffer_unordered(self.settings.max_concurrent_requests)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        for (req, book) in results {
            let book = match book {
                Ok(Ok(book)) => book,
                Ok(Err(e)) => {
                    warn!(
                        exchange = %kind,
                        symbol = %req.symbol,
                        quote = %req.quote,
                        error = %e,
                        "Order book fetch failed"
                    );
                    report.depth_failed += 1;
                    continue;
                }
                Err(_) => {
                    warn!(
                        exchange = %kind,
                        symbol = %req.symbol,
                        quote = %req.quote,
                        timeout_secs = timeout.as_secs(),
                        "Order book fetch timed out"
                    );
                    report.depth_failed += 1;
                    continue;
                }
            };

            let weighting = weighted_bid(&book.bids, req.reference_bid, self.settings.depth_factor);
            let cell = registry
                .coin_mut(&req.symbol)
                .and_then(|c| c.market_mut(kind, req.quote))
                .ok_or_else(|| {
                    ProfitError::Registry(format!(
                        "{kind} cell {}/{} vanished during depth stage",
                        req.symbol, req.quote
                    ))
                })?;
            cell.depth = Some(weighting.depth);
            cell.weighted_bid = weighting.weighted_bid;

            match weighting.weighted_bid {
                Some(wb) => {
                    report.depth_weighted += 1;
                    debug!(
                        exchange = %kind,
                        symbol = %req.symbol,
                        quote = %req.quote,
                        bid = req.reference_bid,
                        weighted_bid = wb,
                        depth = weighting.depth,
                        "Weighted bid computed"
                    );
                }
                None => debug!(
                    exchange = %kind,
                    symbol = %req.symbol,
                    quote = %req.quote,
                    "No bid levels within depth limit"
                ),
            }
        }

        info!(
            exchange = %kind,
            cells = report.cells_updated,
            weighted = report.depth_weighted,
            failed = report.depth_failed,
            "Exchange data collected"
        );

        Ok(report)
    }

    /// Overwrite every coin's cells for `kind` from the ticker and return
    /// the order books the depth stage should fetch.
    ///
    /// A coin the exchange no longer lists loses its cells for `kind`.
    fn apply_ticker(
        kind: ExchangeKind,
        ticker: &TickerSnapshot,
        registry: &mut CoinRegistry,
    ) -> Vec<DepthRequest> {
        let pass = registry.current_pass();
        let mut requests = Vec::new();

        for coin in registry.coins_mut() {
            let mut cells = BTreeMap::new();

            for quote in QuoteCurrency::ALL {
                let Some(entry) = ticker.find(coin.symbol(), quote) else {
                    continue;
                };
                let mut snapshot = MarketSnapshot::from_ticker(entry, pass);
                if !quote.is_primary() {
                    snapshot.cross_rate = ticker.cross_rate(quote);
                }
                if snapshot.bid > 0.0 {
                    requests.push(DepthRequest {
                        symbol: coin.symbol().to_string(),
                        quote,
                        reference_bid: snapshot.bid,
                    });
                }
                cells.insert(quote, snapshot);
            }

            if cells.is_empty() {
                coin.exchange_info.remove(&kind);
            } else {
                coin.exchange_info.insert(kind, cells);
            }
        }

        requests
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
