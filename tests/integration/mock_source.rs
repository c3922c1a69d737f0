//! In-memory collaborators for integration testing.
//!
//! Provides deterministic `MarketSource`, `DaemonInfo` and `DirectiveSink`
//! implementations. Each is a cheap handle over shared state, so a test
//! can keep a clone after handing the boxed original to the pipeline and
//! change its behaviour between passes.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use profitswitch::control::DirectiveSink;
use profitswitch::daemon::DaemonInfo;
use profitswitch::exchanges::MarketSource;
use profitswitch::types::*;

// ---------------------------------------------------------------------------
// Market source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SourceState {
    entries: Vec<TickerEntry>,
    books: HashMap<(QuoteCurrency, String), OrderBook>,
    /// If set, the ticker fetch fails with this message.
    ticker_error: Option<String>,
    /// If set, the ticker fetch never completes.
    ticker_stalled: bool,
    book_requests: Vec<(QuoteCurrency, String)>,
}

/// A mock exchange with a controllable ticker and order books.
#[derive(Clone)]
pub struct MockSource {
    kind: ExchangeKind,
    state: Arc<Mutex<SourceState>>,
}

impl MockSource {
    pub fn new(kind: ExchangeKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    /// List a market whose order book is a single level at `bid`, which
    /// makes the weighted bid equal to `bid`.
    pub fn with_market(self, symbol: &str, quote: QuoteCurrency, bid: f64) -> Self {
        self.with_book(symbol, quote, bid, vec![BidLevel { price: bid, quantity: 100.0 }])
    }

    pub fn with_book(self, symbol: &str, quote: QuoteCurrency, bid: f64, bids: Vec<BidLevel>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.entries.push(TickerEntry {
                base: symbol.to_string(),
                quote,
                ask: bid * 1.02,
                bid,
                last: bid,
                base_volume: 1_000.0,
                quote_volume: bid * 1_000.0,
            });
            state
                .books
                .insert((quote, symbol.to_string()), OrderBook { bids });
        }
        self
    }

    pub fn fail_ticker(&self, message: &str) {
        self.state.lock().unwrap().ticker_error = Some(message.to_string());
    }

    pub fn stall_ticker(&self) {
        self.state.lock().unwrap().ticker_stalled = true;
    }

    pub fn recover(&self) {
        let mut state = self.state.lock().unwrap();
        state.ticker_error = None;
        state.ticker_stalled = false;
    }

    pub fn book_requests(&self) -> Vec<(QuoteCurrency, String)> {
        self.state.lock().unwrap().book_requests.clone()
    }

    pub fn boxed(&self) -> Box<dyn MarketSource> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl MarketSource for MockSource {
    fn kind(&self) -> ExchangeKind {
        self.kind
    }

    async fn fetch_ticker(&self) -> Result<TickerSnapshot> {
        let stalled = self.state.lock().unwrap().ticker_stalled;
        if stalled {
            return future::pending().await;
        }
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.ticker_error {
            return Err(anyhow!("{} ticker: {msg}", self.kind));
        }
        Ok(TickerSnapshot::new(state.entries.clone()))
    }

    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook> {
        let mut state = self.state.lock().unwrap();
        state.book_requests.push((quote, symbol.to_string()));
        state
            .books
            .get(&(quote, symbol.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("{} has no {symbol}/{quote} book", self.kind))
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// A mock coin daemon serving a fixed block template.
#[derive(Clone)]
pub struct MockDaemon {
    template: Arc<Mutex<Option<BlockTemplate>>>,
    stalled: Arc<Mutex<bool>>,
}

impl MockDaemon {
    /// `target` is a hex target; `reward` is in whole coins.
    pub fn new(target: &str, reward: f64) -> Self {
        Self {
            template: Arc::new(Mutex::new(Some(BlockTemplate {
                target: Some(target.to_string()),
                bits: None,
                coinbase_value: reward * 1e8,
            }))),
            stalled: Arc::new(Mutex::new(false)),
        }
    }

    pub fn fail(&self) {
        *self.template.lock().unwrap() = None;
    }

    /// Never answer again.
    pub fn stall(&self) {
        *self.stalled.lock().unwrap() = true;
    }

    pub fn boxed(&self) -> Box<dyn DaemonInfo> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl DaemonInfo for MockDaemon {
    async fn get_block_template(&self) -> Result<BlockTemplate> {
        let stalled = *self.stalled.lock().unwrap();
        if stalled {
            return future::pending().await;
        }
        self.template
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("daemon unreachable"))
    }
}

// ---------------------------------------------------------------------------
// Directive sink
// ---------------------------------------------------------------------------

/// Records every directive it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingSink {
    attempts: Arc<Mutex<Vec<SwitchDirective>>>,
    /// Algorithms whose directives are refused.
    refused: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, algorithm: &str) {
        self.refused.lock().unwrap().push(algorithm.to_string());
    }

    /// Every directive the pipeline tried to send, in order.
    pub fn attempts(&self) -> Vec<SwitchDirective> {
        self.attempts.lock().unwrap().clone()
    }

    /// `(coin, algorithm)` of every attempted directive.
    pub fn switches(&self) -> Vec<(String, String)> {
        self.attempts()
            .into_iter()
            .map(|d| (d.params[0].clone(), d.options.algorithm))
            .collect()
    }

    pub fn boxed(&self) -> Box<dyn DirectiveSink> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl DirectiveSink for RecordingSink {
    async fn send(&self, directive: &SwitchDirective) -> Result<()> {
        self.attempts.lock().unwrap().push(directive.clone());
        if self
            .refused
            .lock()
            .unwrap()
            .contains(&directive.options.algorithm)
        {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }
}
