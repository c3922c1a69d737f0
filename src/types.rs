//! Shared types for the profit switcher.
//!
//! These types form the data model used across all modules: the
//! normalized market data produced by exchange adapters, the per-coin
//! status table owned by the registry, and the directive written to the
//! mining coordinator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Currencies and exchanges
// ---------------------------------------------------------------------------

/// Quote currency a coin is priced in.
///
/// `Btc` is the primary reference currency; every score is expressed in
/// it. `Ltc` is secondary and needs a recorded cross rate to be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteCurrency {
    Btc,
    Ltc,
}

impl QuoteCurrency {
    /// All supported quote currencies, primary first.
    pub const ALL: [QuoteCurrency; 2] = [QuoteCurrency::Btc, QuoteCurrency::Ltc];

    pub const PRIMARY: QuoteCurrency = QuoteCurrency::Btc;

    pub fn code(&self) -> &'static str {
        match self {
            QuoteCurrency::Btc => "BTC",
            QuoteCurrency::Ltc => "LTC",
        }
    }

    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }

    /// Parse an exchange currency code (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|q| q.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for QuoteCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The closed set of supported market sources.
///
/// Declaration order is the configured run order and the order in which
/// the decision engine visits a coin's exchange cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Poloniex,
    Crex24,
    Stex,
    Bittrex,
}

impl ExchangeKind {
    pub const ALL: [ExchangeKind; 4] = [
        ExchangeKind::Poloniex,
        ExchangeKind::Crex24,
        ExchangeKind::Stex,
        ExchangeKind::Bittrex,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExchangeKind::Poloniex => "poloniex",
            ExchangeKind::Crex24 => "crex24",
            ExchangeKind::Stex => "stex",
            ExchangeKind::Bittrex => "bittrex",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Normalized market data (adapter output)
// ---------------------------------------------------------------------------

/// One market from a ticker snapshot, after source-specific normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerEntry {
    /// Symbol of the traded coin, as reported by the exchange.
    pub base: String,
    pub quote: QuoteCurrency,
    pub ask: f64,
    pub bid: f64,
    pub last: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
}

/// Full ticker of one exchange. Pairs quoted in unsupported currencies are
/// dropped by the adapter before they get here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub entries: Vec<TickerEntry>,
}

impl TickerSnapshot {
    pub fn new(entries: Vec<TickerEntry>) -> Self {
        Self { entries }
    }

    /// Look up the market for `symbol` quoted in `quote`.
    pub fn find(&self, symbol: &str, quote: QuoteCurrency) -> Option<&TickerEntry> {
        self.entries
            .iter()
            .find(|e| e.quote == quote && e.base.eq_ignore_ascii_case(symbol))
    }

    /// Rate converting one unit of `quote` into the primary currency.
    ///
    /// Read from the exchange's own `quote`/primary market (e.g. LTC priced
    /// in BTC). `None` when that market is absent or has no positive bid.
    pub fn cross_rate(&self, quote: QuoteCurrency) -> Option<f64> {
        if quote.is_primary() {
            return Some(1.0);
        }
        self.find(quote.code(), QuoteCurrency::PRIMARY)
            .map(|e| e.bid)
            .filter(|bid| *bid > 0.0 && bid.is_finite())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single bid level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Bid side of an order book. Levels need not be sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BidLevel>,
}

// ---------------------------------------------------------------------------
// Coin status table
// ---------------------------------------------------------------------------

/// Market data for one coin on one exchange in one quote currency.
///
/// Replaced wholesale whenever the exchange's ticker is read; `depth` and
/// `weighted_bid` are filled in afterwards by the depth stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ask: f64,
    pub bid: f64,
    pub last: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    /// Sum of `quantity × price` over the qualifying bid levels.
    pub depth: Option<f64>,
    /// Volume-weighted bid. `None` means "no depth data", never zero.
    pub weighted_bid: Option<f64>,
    /// Conversion into the primary currency; only set on secondary quotes.
    pub cross_rate: Option<f64>,
    /// Pass number in which the ticker data was written.
    pub pass: u64,
}

impl MarketSnapshot {
    pub fn from_ticker(entry: &TickerEntry, pass: u64) -> Self {
        Self {
            ask: entry.ask,
            bid: entry.bid,
            last: entry.last,
            base_volume: entry.base_volume,
            quote_volume: entry.quote_volume,
            depth: None,
            weighted_bid: None,
            cross_rate: None,
            pass,
        }
    }
}

/// Exchange → quote currency → market snapshot. Ordered maps keep the
/// decision scan deterministic.
pub type ExchangeInfo = BTreeMap<ExchangeKind, BTreeMap<QuoteCurrency, MarketSnapshot>>;

/// Expected payout per reference hash rate unit, independent of price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MiningRates {
    pub blocks_per_hash_per_hour: f64,
    pub coins_per_hash_per_hour: f64,
}

/// One mineable coin.
///
/// Identity is fixed at construction; everything else is overwritten by
/// the pipeline stages each pass.
#[derive(Debug, Clone, Serialize)]
pub struct CoinStatus {
    name: String,
    symbol: String,
    algorithm: String,
    /// 0 until the first successful daemon query.
    pub difficulty: f64,
    /// Block reward in whole coins.
    pub reward: f64,
    pub rates: Option<MiningRates>,
    /// Highest cell score of the current pass, in the primary currency.
    pub best_score: Option<f64>,
    pub exchange_info: ExchangeInfo,
}

impl CoinStatus {
    pub fn new(name: &str, symbol: &str, algorithm: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            algorithm: algorithm.to_string(),
            difficulty: 0.0,
            reward: 0.0,
            rates: None,
            best_score: None,
            exchange_info: ExchangeInfo::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Snapshot for one exchange/quote cell, if present.
    pub fn market(&self, exchange: ExchangeKind, quote: QuoteCurrency) -> Option<&MarketSnapshot> {
        self.exchange_info.get(&exchange).and_then(|m| m.get(&quote))
    }

    pub fn market_mut(
        &mut self,
        exchange: ExchangeKind,
        quote: QuoteCurrency,
    ) -> Option<&mut MarketSnapshot> {
        self.exchange_info
            .get_mut(&exchange)
            .and_then(|m| m.get_mut(&quote))
    }
}

impl fmt::Display for CoinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}) diff={:.9} reward={} exchanges={}",
            self.name,
            self.symbol,
            self.algorithm,
            self.difficulty,
            self.reward,
            self.exchange_info.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Daemon data
// ---------------------------------------------------------------------------

/// The subset of a `getblocktemplate` result the collector needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlockTemplate {
    /// Full 256-bit target as hex. Some daemons omit it.
    #[serde(default)]
    pub target: Option<String>,
    /// Compact target encoding as hex.
    #[serde(default)]
    pub bits: Option<String>,
    /// Coinbase value in the daemon's base unit.
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: f64,
}

// ---------------------------------------------------------------------------
// Switch directive
// ---------------------------------------------------------------------------

/// Command sent to the mining coordinator to switch an algorithm's coin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchDirective {
    pub command: String,
    pub params: Vec<String>,
    pub options: DirectiveOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectiveOptions {
    pub algorithm: String,
}

impl SwitchDirective {
    pub fn coin_switch(coin: &str, algorithm: &str) -> Self {
        Self {
            command: "coinswitch".to_string(),
            params: vec![coin.to_string()],
            options: DirectiveOptions {
                algorithm: algorithm.to_string(),
            },
        }
    }

    /// Wire form: one JSON object terminated by a newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the profit switcher.
#[derive(Debug, thiserror::Error)]
pub enum ProfitError {
    #[error("Market source error ({exchange}): {message}")]
    Source { exchange: ExchangeKind, message: String },

    #[error("Malformed response from {exchange}: {message}")]
    Malformed { exchange: ExchangeKind, message: String },

    #[error("Daemon error ({symbol}): {message}")]
    Daemon { symbol: String, message: String },

    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Invalid block target: {0}")]
    InvalidTarget(String),

    #[error("Control channel error ({endpoint}): {message}")]
    Control { endpoint: String, message: String },

    #[error("Registry invariant violated: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
