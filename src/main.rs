//! PROFITSWITCH: per-algorithm most-profitable-coin selector.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the coin registry and the exchange/daemon/control clients, and
//! runs one pass per interval until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use profitswitch::config::{self, AppConfig};
use profitswitch::control::TcpControlClient;
use profitswitch::daemon::RpcDaemonClient;
use profitswitch::dashboard::{self, routes::StatusBoard};
use profitswitch::engine::aggregator::{AggregatorSettings, MarketAggregator};
use profitswitch::engine::metrics::NetworkMetricsCollector;
use profitswitch::engine::scheduler::{Pipeline, Scheduler};
use profitswitch::exchanges;
use profitswitch::registry::CoinRegistry;
use profitswitch::types::CoinStatus;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

const BANNER: &str = r#"
 ___          __ _ _   ___        _ _      _
| _ \_ _ ___ / _(_) |_/ __|_ __ _(_) |_ __| |_
|  _/ '_/ _ \  _| |  _\__ \ V  V / |  _/ _| ' \
|_| |_| \___/_| |_|\__|___/\_/\_/|_|\__\__|_||_|

  Per-algorithm most-profitable-coin selector
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("PROFITSWITCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        interval_secs = cfg.switch.interval_secs,
        depth = cfg.switch.depth,
        coins = cfg.coins.len(),
        "PROFITSWITCH starting up"
    );

    // -- Coin registry ---------------------------------------------------

    let registry = CoinRegistry::new(
        cfg.coins
            .iter()
            .map(|c| CoinStatus::new(&c.name, &c.symbol, &c.algorithm)),
    );
    if registry.is_empty() {
        info!("No alternative coins to switch to");
        return Ok(());
    }
    for group in registry.groups() {
        let symbols: Vec<&str> = group.coins().iter().map(|c| c.symbol()).collect();
        info!(algorithm = %group.algorithm(), coins = ?symbols, "Switching group");
    }

    // -- Clients ---------------------------------------------------------

    let timeout = cfg.switch.request_timeout();
    let sources = exchanges::build_sources(&cfg.exchanges, timeout)?;
    if sources.is_empty() {
        info!("No exchanges enabled, no directives will be sent");
    }

    let daemons = RpcDaemonClient::from_config(&cfg.coins, timeout)?;
    let sink = TcpControlClient::new(&cfg.control.host, cfg.control.port, timeout);
    info!(endpoint = %sink.endpoint(), "Switch directives go to the coordinator control port");

    // -- Engine ----------------------------------------------------------

    let pipeline = Pipeline::new(
        registry,
        sources,
        daemons,
        Box::new(sink),
        MarketAggregator::new(aggregator_settings(&cfg)),
        NetworkMetricsCollector::new(
            &cfg.reference_units,
            &cfg.reward_overrides,
            timeout,
            cfg.switch.max_concurrent_requests,
        )?,
    );
    let mut scheduler = Scheduler::new(pipeline, cfg.switch.interval());

    if cfg.dashboard.enabled {
        let board = Arc::new(StatusBoard::new());
        dashboard::spawn_dashboard(board.clone(), cfg.dashboard.port);
        scheduler = scheduler.with_status_board(board);
    }

    // -- Main loop -------------------------------------------------------

    scheduler.run_until(tokio::signal::ctrl_c()).await;

    info!(
        passes = scheduler.pipeline().registry().current_pass(),
        "PROFITSWITCH shut down cleanly."
    );

    Ok(())
}

fn aggregator_settings(cfg: &AppConfig) -> AggregatorSettings {
    AggregatorSettings {
        depth_factor: cfg.switch.depth,
        request_timeout: cfg.switch.request_timeout(),
        max_concurrent_requests: cfg.switch.max_concurrent_requests,
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("profitswitch=info"));

    let json_logging = std::env::var("PROFITSWITCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
