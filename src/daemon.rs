//! Coin daemon integration.
//!
//! Each configured coin has a daemon reachable over JSON-RPC. The only
//! call the switcher needs is `getblocktemplate`, from which the network
//! difficulty and block reward are derived.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::CoinConfig;
use crate::types::{BlockTemplate, ProfitError};

/// Capabilities advertised with `getblocktemplate`.
const TEMPLATE_CAPABILITIES: [&str; 3] = ["coinbasetxn", "workid", "coinbase/append"];

/// Abstraction over a coin daemon.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DaemonInfo: Send + Sync {
    /// Fetch the current block template.
    async fn get_block_template(&self) -> Result<BlockTemplate>;
}

/// JSON-RPC 1.0 reply envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// HTTP JSON-RPC client for one coin daemon.
pub struct RpcDaemonClient {
    http: Client,
    symbol: String,
    url: String,
    user: Option<String>,
    password: Option<SecretString>,
}

impl RpcDaemonClient {
    pub fn new(
        symbol: &str,
        url: &str,
        user: Option<String>,
        password: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| format!("Failed to build RPC client for {symbol}"))?;

        Ok(Self {
            http,
            symbol: symbol.to_string(),
            url: url.to_string(),
            user,
            password,
        })
    }

    /// Build one client per configured coin, keyed by symbol.
    pub fn from_config(
        coins: &[CoinConfig],
        timeout: Duration,
    ) -> Result<HashMap<String, Box<dyn DaemonInfo>>> {
        let mut daemons: HashMap<String, Box<dyn DaemonInfo>> = HashMap::new();
        for coin in coins {
            let password = coin
                .daemon
                .password()
                .with_context(|| format!("Failed to resolve RPC password for {}", coin.symbol))?;
            let client = Self::new(
                &coin.symbol,
                &coin.daemon.url,
                coin.daemon.user.clone(),
                password,
                timeout,
            )?;
            daemons.insert(coin.symbol.clone(), Box::new(client));
        }
        Ok(daemons)
    }

    fn request_body() -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "1.0",
            "id": "profitswitch",
            "method": "getblocktemplate",
            "params": [{ "capabilities": TEMPLATE_CAPABILITIES }],
        })
    }

    fn unwrap_reply(&self, reply: RpcResponse<BlockTemplate>) -> Result<BlockTemplate, ProfitError> {
        if let Some(err) = reply.error.filter(|e| !e.is_null()) {
            return Err(ProfitError::Daemon {
                symbol: self.symbol.clone(),
                message: err.to_string(),
            });
        }
        reply.result.ok_or_else(|| ProfitError::Daemon {
            symbol: self.symbol.clone(),
            message: "empty getblocktemplate result".into(),
        })
    }
}

#[async_trait]
impl DaemonInfo for RpcDaemonClient {
    async fn get_block_template(&self) -> Result<BlockTemplate> {
        debug!(symbol = %self.symbol, url = %self.url, "Requesting block template");

        let mut req = self.http.post(&self.url).json(&Self::request_body());
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.as_ref().map(|p| p.expose_secret()));
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("RPC request to {} daemon failed", self.symbol))?;

        // bitcoind-style daemons answer RPC errors with HTTP 500 and a
        // JSON body, so decode before looking at the status.
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Reading RPC reply from {} daemon failed", self.symbol))?;
        let reply: RpcResponse<BlockTemplate> = serde_json::from_str(&body).map_err(|e| {
            ProfitError::Daemon {
                symbol: self.symbol.clone(),
                message: format!("HTTP {status}, undecodable reply: {e}"),
            }
        })?;

        Ok(self.unwrap_reply(reply)?)
    }
}
