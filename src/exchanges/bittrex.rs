//! Bittrex public market data (API v1.1).
//!
//! Ticker: `GET /api/v1.1/public/getmarketsummaries`, wrapped as
//! `{success, message, result: [..]}` with markets named `QUOTE-BASE`
//! (e.g. `BTC-DGB`). Quote volume isn't reported directly and is derived
//! as `BaseVolume / Last`.
//! Order book: `GET /api/v1.1/public/getorderbook?market=..&type=buy`,
//! bids as `[{Quantity, Rate}]` under `result`.

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

const BASE_URL: &str = "https://api.bittrex.com";

/// Envelope shared by every v1.1 endpoint.
#[derive(Debug, Deserialize)]
struct BittrexResponse<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    result: Option<T>,
}

impl<T> BittrexResponse<T> {
    fn into_result(self) -> Result<T, ProfitError> {
        if !self.success {
            return Err(ProfitError::Source {
                exchange: ExchangeKind::Bittrex,
                message: self.message.unwrap_or_else(|| "success=false".into()),
            });
        }
        self.result.ok_or_else(|| ProfitError::Malformed {
            exchange: ExchangeKind::Bittrex,
            message: "response has no result".into(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BittrexSummary {
    market_name: String,
    last: Num,
    base_volume: Num,
    ask: Num,
    bid: Num,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BittrexLevel {
    quantity: Num,
    rate: Num,
}

pub struct BittrexClient {
    http: Client,
    base_url: String,
}

impl BittrexClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(ExchangeKind::Bittrex, timeout)?,
            base_url: base_url.unwrap_or_else(|| BASE_URL.to_string()),
        })
    }

    fn normalize_ticker(raw: Vec<serde_json::Value>) -> TickerSnapshot {
        let entries = parse_each::<BittrexSummary>(ExchangeKind::Bittrex, raw)
            .into_iter()
            .filter_map(|s| {
                let (base, quote) = split_pair(&s.market_name, '-', true)?;
                let quote_volume = if s.last.0 > 0.0 {
                    s.base_volume.0 / s.last.0
                } else {
                    0.0
                };
                Some(TickerEntry {
                    base,
                    quote,
                    ask: s.ask.0,
                    bid: s.bid.0,
                    last: s.last.0,
                    base_volume: s.base_volume.0,
                    quote_volume,
                })
            })
            .collect();
        TickerSnapshot::new(entries)
    }

    fn normalize_book(levels: Vec<BittrexLevel>) -> OrderBook {
        OrderBook {
            bids: levels
                .into_iter()
                .map(|l| BidLevel {
                    price: l.rate.0,
                    quantity: l.quantity.0,
                })
                .collect(),
        }
    }

    fn market(quote: QuoteCurrency, symbol: &str) -> String {
        format!("{}-{}", quote.code(), symbol.to_ascii_uppercase())
    }
}

#[async_trait]
impl MarketSource for BittrexClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Bittrex
    }

    async fn fetch_ticker(&self) -> Result<TickerSnapshot> {
        let url = format!("{}/api/v1.1/public/getmarketsummaries", self.base_url);
        let raw: BittrexResponse<Vec<serde_json::Value>> =
            get_json(&self.http, self.kind(), &url, &[]).await?;

        let snapshot = Self::normalize_ticker(raw.into_result()?);
        info!(markets = snapshot.len(), "Bittrex ticker fetched");
        Ok(snapshot)
    }

    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook> {
        let url = format!("{}/api/v1.1/public/getorderbook", self.base_url);
        let market = Self::market(quote, symbol);
        let raw: BittrexResponse<Vec<BittrexLevel>> = get_json(
            &self.http,
            self.kind(),
            &url,
            &[("market", market.as_str()), ("type", "buy")],
        )
        .await?;
        Ok(Self::normalize_book(raw.into_result()?))
    }
}
