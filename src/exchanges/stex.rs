//! Stex public market data (api2).
//!
//! Ticker: `GET /api2/ticker`, an array of markets named `BASE_QUOTE`
//! (e.g. `DGB_BTC`). Stex reports a single `vol` figure, used for both
//! volumes.
//! Order book: `GET /api2/orderbook?pair=..`, wrapped as
//! `{success, result: {buy: [{Quantity, Rate}], sell: [..]}}`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::{get_json, http_client, parse_each, split_pair, MarketSource, Num};
use crate::types::{
    BidLevel, ExchangeKind, OrderBook, ProfitError, QuoteCurrency, TickerEntry, TickerSnapshot,
};

const BASE_URL: &str = "https://app.stex.com";
const BOOK_COUNT: &str = "50";

#[derive(Debug, Deserialize)]
struct StexTicker {
    market_name: String,
    ask: Num,
    bid: Num,
    last: Num,
    #[serde(default)]
    vol: Option<Num>,
}

#[derive(Debug, Deserialize)]
struct StexBookResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<StexBook>,
}

#[derive(Debug, Deserialize)]
struct StexBook {
    #[serde(default)]
    buy: Vec<StexLevel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StexLevel {
    quantity: Num,
    rate: Num,
}

pub struct StexClient {
    http: Client,
    base_url: String,
}

impl StexClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(ExchangeKind::Stex, timeout)?,
            base_url: base_url.unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn normalize_ticker(raw: Vec<serde_json::Value>) -> TickerSnapshot {
        let entries = parse_each::<StexTicker>(ExchangeKind::Stex, raw)
            .into_iter()
            .filter_map(|t| {
                let (base, quote) = split_pair(&t.market_name, '_', false)?;
                let volume = t.vol.map(|v| v.0).unwrap_or(0.0);
                Some(TickerEntry {
                    base,
                    quote,
                    ask: t.ask.0,
                    bid: t.bid.0,
                    last: t.last.0,
                    base_volume: volume,
                    quote_volume: volume,
                })
            })
            .collect();
        TickerSnapshot::new(entries)
    }

    fn normalize_book(raw: StexBookResponse) -> Result<OrderBook, ProfitError> {
        if raw.success == Some(false) {
            return Err(ProfitError::Malformed {
                exchange: ExchangeKind::Stex,
                message: "order book request reported success=false".into(),
            });
        }
        let book = raw.result.ok_or_else(|| ProfitError::Malformed {
            exchange: ExchangeKind::Stex,
            message: "order book response has no result".into(),
        })?;
        Ok(OrderBook {
            bids: book
                .buy
                .into_iter()
                .map(|l| BidLevel {
                    price: l.rate.0,
                    quantity: l.quantity.0,
                })
                .collect(),
        })
    }

    fn pair(quote: QuoteCurrency, symbol: &str) -> String {
        format!("{}_{}", symbol.to_ascii_uppercase(), quote.code())
    }
}

#[async_trait]
impl MarketSource for StexClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Stex
    }

    async fn fetch_ticker(&self) -> Result<TickerSnapshot> {
        let url = format!("{}/api2/ticker", self.base_url);
        let raw: Vec<serde_json::Value> = get_json(&self.http, self.kind(), &url, &[]).await?;

        let snapshot = Self::normalize_ticker(raw);
        info!(markets = snapshot.len(), "Stex ticker fetched");
        Ok(snapshot)
    }

    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook> {
        let url = format!("{}/api2/orderbook", self.base_url);
        let pair = Self::pair(quote, symbol);
        let raw: StexBookResponse = get_json(
            &self.http,
            self.kind(),
            &url,
            &[("pair", pair.as_str()), ("count", BOOK_COUNT)],
        )
        .await?;
        Ok(Self::normalize_book(raw)?)
    }
}
