//! Pass pipeline and periodic scheduler.
//!
//! A pass runs the stages in a fixed order over the single registry the
//! pipeline owns:
//!
//! enabled exchanges (configured order) → network metrics →
//! profitability → decision → directive emission
//!
//! Passes never overlap: the scheduler awaits each pass inside its loop
//! and skips ticks that elapse while one is running.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::aggregator::{MarketAggregator, SourceReport};
use super::decision::{EmitReport, SwitchDecision, SwitchDecisionEngine};
use super::metrics::{MetricsReport, NetworkMetricsCollector};
use super::profitability::ProfitabilityCalculator;
use crate::control::DirectiveSink;
use crate::daemon::DaemonInfo;
use crate::dashboard::routes::StatusBoard;
use crate::exchanges::MarketSource;
use crate::registry::CoinRegistry;

/// Summary of one completed pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
    pub metrics: MetricsReport,
    pub rated_coins: usize,
    pub decisions: Vec<SwitchDecision>,
    pub groups_without_data: usize,
    pub directives: EmitReport,
}

impl PassReport {
    pub fn sources_ok(&self) -> usize {
        self.sources.iter().filter(|s| s.ticker_ok).count()
    }

    pub fn sources_failed(&self) -> usize {
        self.sources.len() - self.sources_ok()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything one pass needs, owned in one place.
pub struct Pipeline {
    registry: CoinRegistry,
    sources: Vec<Box<dyn MarketSource>>,
    daemons: HashMap<String, Box<dyn DaemonInfo>>,
    sink: Box<dyn DirectiveSink>,
    aggregator: MarketAggregator,
    metrics: NetworkMetricsCollector,
    profitability: ProfitabilityCalculator,
    decision: SwitchDecisionEngine,
}

impl Pipeline {
    pub fn new(
        registry: CoinRegistry,
        sources: Vec<Box<dyn MarketSource>>,
        daemons: HashMap<String, Box<dyn DaemonInfo>>,
        sink: Box<dyn DirectiveSink>,
        aggregator: MarketAggregator,
        metrics: NetworkMetricsCollector,
    ) -> Self {
        Self {
            registry,
            sources,
            daemons,
            sink,
            aggregator,
            metrics,
            profitability: ProfitabilityCalculator::new(),
            decision: SwitchDecisionEngine::new(),
        }
    }

    pub fn registry(&self) -> &CoinRegistry {
        &self.registry
    }

    /// Run one full pass. An `Err` aborts the rest of the pass; the
    /// registry keeps whatever the completed stages wrote.
    pub async fn run_pass(&mut self) -> Result<PassReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let pass = self.registry.begin_pass();
        info!(pass, "Starting pass");

        // 1. Market data, one exchange at a time
        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let report = self
                .aggregator
                .collect(source.as_ref(), &mut self.registry)
                .await?;
            sources.push(report);
        }

        // 2. Network metrics
        let metrics = self.metrics.collect(&self.daemons, &mut self.registry).await?;

        // 3. Profitability
        let rated_coins = self.profitability.apply(&mut self.registry);

        // 4. Decision
        let decisions = self.decision.decide(&mut self.registry);
        let groups_without_data = self.registry.groups().len() - decisions.len();

        // 5. Directives
        let directives = self.decision.emit(&decisions, self.sink.as_ref()).await;

        Ok(PassReport {
            pass,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            sources,
            metrics,
            rated_coins,
            decisions,
            groups_without_data,
            directives,
        })
    }
}

/// What the scheduler drives once per tick.
#[async_trait]
pub trait PassRunner: Send {
    async fn run_pass(&mut self) -> Result<PassReport>;

    /// Registry state after the last pass, for publishing.
    fn registry(&self) -> &CoinRegistry;
}

#[async_trait]
impl PassRunner for Pipeline {
    async fn run_pass(&mut self) -> Result<PassReport> {
        Pipeline::run_pass(self).await
    }

    fn registry(&self) -> &CoinRegistry {
        &self.registry
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler<P = Pipeline> {
    pipeline: P,
    period: Duration,
    board: Option<Arc<StatusBoard>>,
}

impl<P: PassRunner> Scheduler<P> {
    pub fn new(pipeline: P, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            board: None,
        }
    }

    /// Publish every completed pass to the status board.
    pub fn with_status_board(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = Some(board);
        self
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// Run passes on the configured period until `shutdown` resolves.
    /// The first pass starts immediately.
    pub async fn run_until<F: Future>(&mut self, shutdown: F) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.period.as_secs(),
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.pipeline.run_pass().await {
                        Ok(report) => {
                            log_pass_report(&report);
                            if let Some(board) = &self.board {
                                board.publish(report, self.pipeline.registry()).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Pass failed, continuing to next");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }
    }
}

fn log_pass_report(report: &PassReport) {
    info!(
        pass = report.pass,
        sources_ok = report.sources_ok(),
        sources_failed = report.sources_failed(),
        daemons_ok = report.metrics.updated,
        daemons_failed = report.metrics.failed,
        rated = report.rated_coins,
        decisions = report.decisions.len(),
        no_data = report.groups_without_data,
        sent = report.directives.sent,
        send_failed = report.directives.failed,
        duration_ms = report.duration_ms,
        "Pass complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
