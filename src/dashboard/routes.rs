//! Dashboard API route handlers.
//!
//! All endpoints return JSON read from the `StatusBoard`, which the
//! scheduler refreshes after every completed pass. Handlers never see the
//! live registry.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::decision::SwitchDecision;
use crate::engine::scheduler::PassReport;
use crate::registry::CoinRegistry;
use crate::types::CoinStatus;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Owned copy of the last completed pass.
pub struct StatusBoard {
    started_at: DateTime<Utc>,
    snapshot: RwLock<Snapshot>,
}

/// Report and coin table of the same pass, swapped together.
#[derive(Default)]
struct Snapshot {
    report: Option<PassReport>,
    groups: Vec<GroupView>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Replace the board's contents with a finished pass.
    pub async fn publish(&self, report: PassReport, registry: &CoinRegistry) {
        let groups = registry
            .groups()
            .iter()
            .map(|g| GroupView {
                algorithm: g.algorithm().to_string(),
                coins: g.coins().to_vec(),
            })
            .collect();

        *self.snapshot.write().await = Snapshot {
            report: Some(report),
            groups,
        };
    }

    pub async fn pass_count(&self) -> u64 {
        self.snapshot.read().await.report.as_ref().map_or(0, |r| r.pass)
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

pub type AppState = Arc<StatusBoard>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub passes: u64,
    pub uptime_secs: i64,
    pub last_pass: Option<PassReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub algorithm: String,
    pub coins: Vec<CoinStatus>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let last_pass = state.snapshot.read().await.report.clone();
    Json(StatusResponse {
        passes: last_pass.as_ref().map_or(0, |r| r.pass),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        last_pass,
    })
}

/// GET /api/coins
pub async fn get_coins(State(state): State<AppState>) -> Json<Vec<GroupView>> {
    Json(state.snapshot.read().await.groups.clone())
}

/// GET /api/decisions
pub async fn get_decisions(State(state): State<AppState>) -> Json<Vec<SwitchDecision>> {
    let snapshot = state.snapshot.read().await;
    Json(
        snapshot
            .report
            .as_ref()
            .map(|r| r.decisions.clone())
            .unwrap_or_default(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
