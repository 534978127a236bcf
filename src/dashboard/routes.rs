//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Handlers never touch the engine: they read the view published after
//! each settlement and queue control requests for the pump to apply
//! between rounds.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::backtest::BacktestSummary;
use crate::config::{EngineSettings, SignalConfig};
use crate::engine::RoundSettlementEngine;
use crate::signal::{build_links, fmt_duration, SignalInput, SignalLinks};
use crate::strategy::predictor::Prediction;
use crate::strategy::{GuardPhase, RiskState};
use crate::types::{HighEta, LedgerState, Mode, PredictionRecord, SettlementOutput, StakeStrategy};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Read-only copy of the engine taken after each settlement.
#[derive(Debug, Clone, Serialize)]
pub struct EngineView {
    pub latest: Option<SettlementOutput>,
    /// Target the next round would get.
    pub next: Prediction,
    pub ledger: LedgerState,
    pub settings: EngineSettings,
    pub history: Vec<PredictionRecord>,
    pub risk: RiskState,
    pub eta: Option<HighEta>,
    pub backtest: Option<BacktestSummary>,
    pub equity: Vec<Decimal>,
    pub pl_history: Vec<Decimal>,
    pub daily_pl: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl EngineView {
    pub fn capture(engine: &RoundSettlementEngine) -> Self {
        Self {
            latest: engine.latest().cloned(),
            next: engine.preview(),
            ledger: engine.ledger().clone(),
            settings: engine.settings().clone(),
            history: engine.history().records().to_vec(),
            risk: *engine.risk_state(),
            eta: engine.eta(),
            backtest: engine.backtest_summary(),
            equity: engine.equity_curve(),
            pl_history: engine.pl_history().to_vec(),
            daily_pl: engine.daily_pl(),
            updated_at: Utc::now(),
        }
    }
}

/// Engine mutations requested over HTTP, applied before the next settlement.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    ReplaceSettings(EngineSettings),
    ResetBalance,
    ResetDailyBaseline,
}

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub view: RwLock<EngineView>,
    /// In-flight multiplier of the running round. Cleared on settlement.
    pub live: RwLock<Option<f64>>,
    pending: Mutex<Vec<ControlRequest>>,
    signal: SignalConfig,
    started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(engine: &RoundSettlementEngine, signal: SignalConfig) -> Self {
        Self {
            view: RwLock::new(EngineView::capture(engine)),
            live: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
            signal,
            started_at: Utc::now(),
        }
    }

    /// Refresh the view from the engine and clear the live value.
    pub async fn publish(&self, engine: &RoundSettlementEngine) {
        let view = EngineView::capture(engine);
        *self.view.write().await = view;
        *self.live.write().await = None;
    }

    pub async fn set_live(&self, value: f64) {
        *self.live.write().await = Some(value);
    }

    pub async fn queue(&self, request: ControlRequest) {
        self.pending.lock().await.push(request);
    }

    pub async fn queue_settings(&self, settings: EngineSettings) {
        self.queue(ControlRequest::ReplaceSettings(settings)).await;
    }

    /// Drain queued requests, oldest first.
    pub async fn take_pending(&self) -> Vec<ControlRequest> {
        std::mem::take(&mut *self.pending.lock().await)
    }
}

/// Type alias for the shared state used by axum.
pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub latest: Option<SettlementOutput>,
    pub next_target: f64,
    pub next_confidence: f64,
    pub rationale: String,
    pub live: Option<f64>,
    pub balance: Decimal,
    pub start_balance: Decimal,
    pub profit: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub accuracy: f64,
    pub small_acc: f64,
    pub roi_pct: f64,
    pub daily_pl: Decimal,
    pub cooldown_rounds_remaining: u32,
    pub guard: GuardPhase,
    pub mode: Mode,
    pub stake_strategy: StakeStrategy,
    pub rounds_recorded: usize,
    pub pending_requests: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EtaResponse {
    pub eta: Option<HighEta>,
    pub remaining_ms: Option<i64>,
    pub countdown: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquityResponse {
    pub equity: Vec<Decimal>,
    pub pl_history: Vec<Decimal>,
    pub daily_pl: Decimal,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/status: latest settlement, ledger and guard state.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let view = state.view.read().await;
    let live = *state.live.read().await;
    let pending_requests = state.pending.lock().await.len();
    let ledger = &view.ledger;

    Json(StatusResponse {
        status: "running".to_string(),
        latest: view.latest.clone(),
        next_target: view.next.target,
        next_confidence: view.next.confidence,
        rationale: view.next.rationale.clone(),
        live,
        balance: ledger.balance,
        start_balance: ledger.start_balance,
        profit: ledger.profit,
        wins: ledger.wins,
        losses: ledger.losses,
        accuracy: ledger.accuracy(),
        small_acc: ledger.small_accuracy(),
        roi_pct: ledger.roi_pct(),
        daily_pl: view.daily_pl,
        cooldown_rounds_remaining: view.risk.cooldown_remaining,
        guard: view.risk.phase(),
        mode: view.settings.mode,
        stake_strategy: view.settings.stake_strategy,
        rounds_recorded: view.history.len(),
        pending_requests,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/rounds: recorded rounds, newest first.
pub async fn get_rounds(State(state): State<AppState>) -> Json<Vec<PredictionRecord>> {
    Json(state.view.read().await.history.clone())
}

/// GET /api/eta: next ≥10x estimate.
pub async fn get_eta(State(state): State<AppState>) -> Json<EtaResponse> {
    let eta = state.view.read().await.eta;
    let remaining_ms = eta.map(|e| e.remaining_ms(Utc::now()));
    Json(EtaResponse {
        eta,
        remaining_ms,
        countdown: remaining_ms.map(fmt_duration),
    })
}

/// GET /api/backtest: summary over recorded rounds, `null` when empty.
pub async fn get_backtest(State(state): State<AppState>) -> Json<Option<BacktestSummary>> {
    Json(state.view.read().await.backtest.clone())
}

pub async fn get_equity(State(state): State<AppState>) -> Json<EquityResponse> {
    let view = state.view.read().await;
    Json(EquityResponse {
        equity: view.equity.clone(),
        pl_history: view.pl_history.clone(),
        daily_pl: view.daily_pl,
    })
}

/// GET /api/signal: share text and links.
pub async fn get_signal(State(state): State<AppState>) -> Json<SignalLinks> {
    let view = state.view.read().await;
    let input = SignalInput {
        eta: view.eta,
        target: view.next.target,
        ledger: &view.ledger,
        history: &view.history,
        now: Utc::now(),
    };
    Json(build_links(&state.signal, &input))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<EngineSettings> {
    Json(state.view.read().await.settings.clone())
}

/// PUT /api/settings: queue a full replacement. Missing fields take
/// their defaults; the sanitized settings are echoed back.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<EngineSettings>,
) -> (StatusCode, Json<EngineSettings>) {
    let settings = settings.sanitize();
    state.queue_settings(settings.clone()).await;
    (StatusCode::ACCEPTED, Json(settings))
}

/// POST /api/reset/balance
pub async fn reset_balance(State(state): State<AppState>) -> StatusCode {
    state.queue(ControlRequest::ResetBalance).await;
    StatusCode::ACCEPTED
}

/// POST /api/reset/daily
pub async fn reset_daily(State(state): State<AppState>) -> StatusCode {
    state.queue(ControlRequest::ResetDailyBaseline).await;
    StatusCode::ACCEPTED
}

/// GET /health: simple health check.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
