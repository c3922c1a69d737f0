//! Market source integrations.
//!
//! Defines the `MarketSource` trait and provides public-endpoint
//! implementations for:
//! - Poloniex: keyed ticker object
//! - Crex24: instrument array
//! - Stex: market array
//! - Bittrex: wrapped market summaries
//!
//! Only BTC and LTC quoted markets are kept.
//!
//! Every adapter turns its source-specific JSON into the common
//! `TickerSnapshot` / `OrderBook` shapes. Numeric fields are parsed into
//! `f64` at this boundary; a market that fails to parse is dropped on its
//! own without failing the rest of the snapshot.

pub mod bittrex;
pub mod crex24;
pub mod poloniex;
pub mod stex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

use crate::config::ExchangesConfig;
use crate::types::{ExchangeKind, OrderBook, ProfitError, QuoteCurrency, TickerSnapshot};

const USER_AGENT: &str = "profitswitch/0.1.0 (mining-profit-switcher)";

/// Abstraction over exchanges that publish a ticker and order books.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Which exchange this is; keys the coin's `exchange_info`.
    fn kind(&self) -> ExchangeKind;

    /// Fetch every market the exchange lists.
    async fn fetch_ticker(&self) -> Result<TickerSnapshot>;

    /// Fetch the bid side of the book for `symbol` priced in `quote`.
    async fn fetch_order_book(&self, quote: QuoteCurrency, symbol: &str) -> Result<OrderBook>;
}

/// Build clients for every enabled exchange, in run order.
pub fn build_sources(cfg: &ExchangesConfig, timeout: Duration) -> Result<Vec<Box<dyn MarketSource>>> {
    let mut sources: Vec<Box<dyn MarketSource>> = Vec::new();
    for kind in cfg.enabled() {
        let base_url = cfg.get(kind).base_url.clone();
        let source: Box<dyn MarketSource> = match kind {
            ExchangeKind::Poloniex => Box::new(poloniex::PoloniexClient::new(base_url, timeout)?),
            ExchangeKind::Crex24 => Box::new(crex24::Crex24Client::new(base_url, timeout)?),
            ExchangeKind::Stex => Box::new(stex::StexClient::new(base_url, timeout)?),
            ExchangeKind::Bittrex => Box::new(bittrex::BittrexClient::new(base_url, timeout)?),
        };
        sources.push(source);
    }
    Ok(sources)
}

// ---------------------------------------------------------------------------
// Shared HTTP helpers
// ---------------------------------------------------------------------------

pub(crate) fn http_client(kind: ExchangeKind, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .with_context(|| format!("Failed to build HTTP client for {kind}"))
}

/// GET `url` and decode the body as `T`.
///
/// Non-2xx statuses become `ProfitError::Source`; a body of the wrong
/// shape becomes `ProfitError::Malformed`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    kind: ExchangeKind,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T> {
    debug!(exchange = %kind, url = %url, "Fetching");

    let resp = http
        .get(url)
        .query(query)
        .send()
        .await
        .with_context(|| format!("{kind} API request failed"))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .with_context(|| format!("{kind} API response body could not be read"))?;
    if !status.is_success() {
        return Err(ProfitError::Source {
            exchange: kind,
            message: format!("HTTP {status}: {}", truncate(&body, 200)),
        }
        .into());
    }

    serde_json::from_str(&body).map_err(|e| {
        anyhow::Error::from(ProfitError::Malformed {
            exchange: kind,
            message: format!("{e}: {}", truncate(&body, 200)),
        })
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Decode each market independently, dropping the ones that don't parse.
pub(crate) fn parse_each<T: DeserializeOwned>(
    kind: ExchangeKind,
    items: impl IntoIterator<Item = serde_json::Value>,
) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(exchange = %kind, error = %e, "Skipping unparseable market");
                None
            }
        })
        .collect()
}

/// Split a pair name into (base symbol, quote currency).
///
/// `quote_first` selects between `QUOTE<sep>BASE` and `BASE<sep>QUOTE`
/// naming. Pairs in unsupported quote currencies yield `None`.
pub(crate) fn split_pair(pair: &str, sep: char, quote_first: bool) -> Option<(String, QuoteCurrency)> {
    let (left, right) = pair.split_once(sep)?;
    let (base, quote) = if quote_first { (right, left) } else { (left, right) };
    if base.is_empty() {
        return None;
    }
    Some((base.to_ascii_uppercase(), QuoteCurrency::from_code(quote)?))
}

// ---------------------------------------------------------------------------
// Lenient numeric field
// ---------------------------------------------------------------------------

/// A price or volume that exchanges send either as a JSON number or as a
/// decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct Num(pub f64);

impl<'de> Deserialize<'de> for Num {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        let value = match Raw::deserialize(deserializer)? {
            Raw::Number(n) => n,
            Raw::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| D::Error::custom(format!("not a number: {s:?}")))?,
        };
        if !value.is_finite() {
            return Err(D::Error::custom("non-finite number"));
        }
        Ok(Num(value))
    }
}

/// Serve one HTTP 200 whose body stops short of its `Content-Length`, so
/// the headers arrive but reading the body fails. Returns the base URL.
#[cfg(test)]
pub(crate) async fn serve_truncated_body() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Drain the whole request first so closing doesn't reset the
        // connection under the client.
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + body_len {
                    break;
                }
            }
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 200\r\n\r\n{\"result\":",
            )
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
