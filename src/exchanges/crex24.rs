//! Crex24 public market data (API v2).
//!
//! Ticker: `GET /v2/public/tickers`, an array of markets named by
//! `BASE-QUOTE` instrument (e.g. `DGB-BTC`); prices may be null on
//! inactive markets.
//! Order book: `GET /v2/public/orderBook?instrument=..`, bids under
//! `buyLevels` as `{price, volume}` objects.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::{get_json, http_client, parse_each, split_pair, MarketSource, Num};
use crate::types::{BidLevel, ExchangeKind, OrderBook, QuoteCurrency, TickerEntry, TickerSnapshot};

const BASE_URL: &str = "https://api.crex24.com";
const BOOK_LIMIT: &str = "50";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crex24Ticker {
    instrument: String,
    #[serde(default)]
    last: Option<Num>,
    #[serde(default)]
    ask: Option<Num>,
    #[serde(default)]
    bid: Option<Num>,
    #[serde(default)]
    base_volume: Option<Num>,
    #[serde(default)]
    quote_volume: Option<Num>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Crex24Book {
    #[serde(default)]
    buy_levels: Vec<Crex24Level>,
}

#[derive(Debug, Deserialize)]
struct Crex24Level {
    price: Num,
    volume: Num,
}

pub struct Crex24Client {
    http: Client,
    base_url: String,
}

impl Crex24Client {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(ExchangeKind::Crex24, timeout)?,
            base_url: base_url.unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn normalize_ticker(raw: Vec<serde_json::Value>) -> TickerSnapshot {
        let value = |n: Option<Num>| n.map(|n| n.0).unwrap_or(0.0);
        let entries = parse_each::<Crex24Ticker>(ExchangeKind::Crex24, raw)
            .into_iter()
            .filter_map(|t| {
                let (base, quote) = split_pair(&t.instrument, '-', false)?;
                Some(TickerEntry {
                    base,
                    quote,
                    ask: value(t.ask),
                    bid: value(t.bid),
                    last: value(t.last),
                    base_volume: value(t.base_volume),
                    quote_volume: value(t.quote_volume),
                })
            })
            .collect();
        TickerSnapshot::new(entries)
    }

    fn normalize_book(raw: Crex24Book) -> OrderBook {
        OrderBook {
            bids: raw
                .buy_levels
                .into_iter()
                .map(|l| BidLevel {
                    price: l.price.0,
                    quantity: l.volume.0,
                })
                .collect(),
        }
    }

    fn instrument(quote: QuoteCurrency, symbol: &str) -> String {
        format!("{}-{}", symbol.to_ascii_uppercase(), quote.code())
    }
}

#[async_trait]
impl MarketSource for Crex24Client {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Crex24
    }

    async fn fetch_ticker(&self) -> Result<TickerSnapshot> {
        let url = format!("{}/v2/public/tickers", self.base_url);
        let raw: Vec<serde_json::Value> = get_json(&self.http, self.kind(), &url, &[]).await?;

        let snapshot = Self::normalize_ticker(raw);
        info!(markets = snapshot.len(), "Crex24 ticker fetched");
        Ok(snapshot)
    }

    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook> {
        let url = format!("{}/v2/public/orderBook", self.base_url);
        let instrument = Self::instrument(quote, symbol);
        let raw: Crex24Book = get_json(
            &self.http,
            self.kind(),
            &url,
            &[("instrument", instrument.as_str()), ("limit", BOOK_LIMIT)],
        )
        .await?;
        Ok(Self::normalize_book(raw))
    }
}
