//! Poloniex public market data.
//!
//! Ticker: `GET /public?command=returnTicker`, an object keyed by
//! `QUOTE_BASE` pair names (e.g. `BTC_DGB`) with string-encoded numbers.
//! Order book: `GET /public?command=returnOrderBook&currencyPair=..`,
//! bids as `[price, quantity]` tuples.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{get_json, http_client, split_pair, MarketSource, Num};
use crate::types::{BidLevel, ExchangeKind, OrderBook, QuoteCurrency, TickerEntry, TickerSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://poloniex.com";

/// Book levels requested per side.
const BOOK_DEPTH: &str = "50";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoloniexTicker {
    lowest_ask: Num,
    highest_bid: Num,
    last: Num,
    base_volume: Num,
    quote_volume: Num,
}

#[derive(Debug, Deserialize)]
struct PoloniexBook {
    #[serde(default)]
    bids: Vec<(Num, Num)>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PoloniexClient {
    http: Client,
    base_url: String,
}

impl PoloniexClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(ExchangeKind::Poloniex, timeout)?,
            base_url: base_url.unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn normalize_ticker(raw: BTreeMap<String, serde_json::Value>) -> TickerSnapshot {
        let mut entries = Vec::new();
        for (pair, value) in raw {
            let Some((base, quote)) = split_pair(&pair, '_', true) else {
                continue;
            };
            match serde_json::from_value::<PoloniexTicker>(value) {
                Ok(t) => entries.push(TickerEntry {
                    base,
                    quote,
                    ask: t.lowest_ask.0,
                    bid: t.highest_bid.0,
                    last: t.last.0,
                    base_volume: t.base_volume.0,
                    quote_volume: t.quote_volume.0,
                }),
                Err(e) => debug!(pair = %pair, error = %e, "Skipping unparseable Poloniex market"),
            }
        }
        TickerSnapshot::new(entries)
    }

    fn normalize_book(raw: PoloniexBook) -> OrderBook {
        OrderBook {
            bids: raw
                .bids
                .into_iter()
                .map(|(price, quantity)| BidLevel {
                    price: price.0,
                    quantity: quantity.0,
                })
                .collect(),
        }
    }

    fn pair(quote: QuoteCurrency, symbol: &str) -> String {
        format!("{}_{}", quote.code(), symbol.to_ascii_uppercase())
    }
}

#[async_trait]
impl MarketSource for PoloniexClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Poloniex
    }

    async fn fetch_ticker(&self) -> Result<TickerSnapshot> {
        let url = format!("{}/public", self.base_url);
        let raw: BTreeMap<String, serde_json::Value> =
            get_json(&self.http, self.kind(), &url, &[("command", "returnTicker")]).await?;

        let snapshot = Self::normalize_ticker(raw);
        info!(markets = snapshot.len(), "Poloniex ticker fetched");
        Ok(snapshot)
    }

    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook> {
        let url = format!("{}/public", self.base_url);
        let pair = Self::pair(quote, symbol);
        let raw: PoloniexBook = get_json(
            &self.http,
            self.kind(),
            &url,
            &[
                ("command", "returnOrderBook"),
                ("currencyPair", pair.as_str()),
                ("depth", BOOK_DEPTH),
            ],
        )
        .await?;
        Ok(Self::normalize_book(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
