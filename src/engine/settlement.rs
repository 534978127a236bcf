//! Round settlement.
//!
//! Settles each completed round: predict the target from history, size
//! the stake, pass the risk gate, score the outcome, move the bankroll and
//! advance the guard. One outcome is fully settled before the next is
//! accepted; settings changes land between rounds only.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::history::{RoundHistory, HISTORY_CAPACITY};
use crate::backtest::runner::{summarize, BacktestSummary};
use crate::config::EngineSettings;
use crate::strategy::eta;
use crate::strategy::predictor::{
    Prediction, PredictorState, SafeCashoutPredictor, SmallAccuracy,
};
use crate::strategy::risk::{RiskGuard, RiskLimits, RiskState, WagerOutcome, WagerProposal};
use crate::strategy::stake::{StakeConfig, StakeSizer, StakeState};
use crate::types::{
    round2, HighEta, LedgerState, OracleError, PredictionRecord, RoundOutcome, SettlementOutput,
    NEUTRAL_MULTIPLIER, SMALL_BUCKET_MAX,
};

/// Tolerance when comparing the outcome against the target.
const HIT_EPSILON: f64 = 1e-6;

/// Per-round P/L entries kept.
const PL_HISTORY_LEN: usize = 50;

/// Points in the equity curve.
const EQUITY_POINTS: usize = 20;

// ---------------------------------------------------------------------------
// Daily baseline and snapshot
// ---------------------------------------------------------------------------

/// Balance at the start of the current UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBaseline {
    pub date: NaiveDate,
    pub balance: Decimal,
}

/// What survives a restart: settings, ledger and the daily baseline.
/// Round history is rebuilt from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub settings: EngineSettings,
    pub ledger: LedgerState,
    pub daily: DailyBaseline,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RoundSettlementEngine {
    settings: EngineSettings,
    stake: StakeSizer,
    risk: RiskGuard,
    history: RoundHistory,
    ledger: LedgerState,
    predictor_state: PredictorState,
    stake_state: StakeState,
    risk_state: RiskState,
    /// Per-round deltas, newest first.
    pl_history: Vec<Decimal>,
    last_seq: Option<u64>,
    daily: DailyBaseline,
    latest: Option<SettlementOutput>,
}

impl RoundSettlementEngine {
    pub fn new(settings: EngineSettings, start_balance: Decimal) -> Self {
        let settings = settings.sanitize();
        let ledger = LedgerState::new(start_balance);
        let daily = DailyBaseline {
            date: Utc::now().date_naive(),
            balance: ledger.balance,
        };
        Self {
            stake: StakeSizer::new(StakeConfig::from(&settings)),
            risk: RiskGuard::new(RiskLimits::from(&settings)),
            settings,
            history: RoundHistory::new(HISTORY_CAPACITY),
            ledger,
            predictor_state: PredictorState::default(),
            stake_state: StakeState::default(),
            risk_state: RiskState::default(),
            pl_history: Vec::new(),
            last_seq: None,
            daily,
            latest: None,
        }
    }

    /// Rebuild from a saved snapshot. Smoothing, boost and cooldown restart.
    pub fn restore(snapshot: EngineSnapshot) -> Self {
        let mut engine = Self::new(snapshot.settings, snapshot.ledger.start_balance);
        let mut ledger = snapshot.ledger;
        ledger.balance = ledger.balance.max(Decimal::ZERO);
        ledger.profit = ledger.balance - ledger.start_balance;
        engine.ledger = ledger;
        engine.daily = snapshot.daily;
        engine
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            settings: self.settings.clone(),
            ledger: self.ledger.clone(),
            daily: self.daily.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    // -- Accessors ---------------------------------------------------------

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &LedgerState {
        &self.ledger
    }

    pub fn history(&self) -> &RoundHistory {
        &self.history
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk_state
    }

    pub fn stake_state(&self) -> &StakeState {
        &self.stake_state
    }

    pub fn predictor_state(&self) -> &PredictorState {
        &self.predictor_state
    }

    /// Per-round P/L, newest first.
    pub fn pl_history(&self) -> &[Decimal] {
        &self.pl_history
    }

    pub fn latest(&self) -> Option<&SettlementOutput> {
        self.latest.as_ref()
    }

    pub fn daily_baseline(&self) -> &DailyBaseline {
        &self.daily
    }

    // -- Settings ----------------------------------------------------------

    /// Replace the settings snapshot wholesale. Takes effect on the next
    /// settlement.
    pub fn update_settings(&mut self, settings: EngineSettings) {
        let settings = settings.sanitize();
        info!(
            mode = %settings.mode,
            strategy = %settings.stake_strategy,
            risk_pct = settings.risk_pct,
            auto_tune = settings.auto_tune,
            auto_skip = settings.auto_skip,
            "Settings updated"
        );
        self.stake = StakeSizer::new(StakeConfig::from(&settings));
        self.risk = RiskGuard::new(RiskLimits::from(&settings));
        self.settings = settings;
    }

    // -- Settlement --------------------------------------------------------

    /// Settle one completed round.
    pub fn process_outcome(&mut self, outcome: RoundOutcome) -> Result<SettlementOutput, OracleError> {
        self.validate(&outcome)?;
        self.roll_daily(outcome.time.date_naive());

        let prediction = self.predict();
        let target = prediction.target;
        let confidence = prediction.confidence;

        let stake = self
            .stake
            .size(confidence, target, self.ledger.balance, &self.stake_state);
        let gate = self.risk.gate(
            &self.risk_state,
            &WagerProposal {
                target,
                confidence,
                eff_risk: stake.eff_risk,
                amount: stake.amount,
            },
            &self.ledger,
        );
        let will_bet = gate.is_ok();

        let value = outcome.value;
        let neutral = outcome.is_neutral();
        let hit = !neutral && value + HIT_EPSILON >= target;
        let success = will_bet && hit;
        let placed = will_bet && !neutral;

        let bet = if placed { stake.amount } else { Decimal::ZERO };
        let target_dec = Decimal::from_f64(target).unwrap_or(Decimal::ONE).round_dp(2);
        let delta = match (placed, success) {
            (false, _) => Decimal::ZERO,
            (true, true) => (bet * (target_dec - Decimal::ONE)).round_dp(2),
            (true, false) => -bet,
        };

        self.ledger.balance = (self.ledger.balance + delta).max(Decimal::ZERO).round_dp(2);
        self.ledger.profit = self.ledger.balance - self.ledger.start_balance;
        if !neutral {
            if hit {
                self.ledger.wins += 1;
            } else {
                self.ledger.losses += 1;
            }
            if value >= NEUTRAL_MULTIPLIER && value <= SMALL_BUCKET_MAX {
                if hit {
                    self.ledger.small_wins += 1;
                } else {
                    self.ledger.small_loss += 1;
                }
            }
        }

        let wager = match (placed, success) {
            (false, _) => WagerOutcome::Skipped,
            (true, true) => WagerOutcome::Won,
            (true, false) => WagerOutcome::Lost,
        };
        self.stake.record_settlement(&mut self.stake_state, wager);
        self.risk.advance(&mut self.risk_state, wager, &self.ledger);

        let record = PredictionRecord {
            final_value: round2(value),
            suggested: target,
            bet,
            success,
            time: outcome.time,
        };
        self.history.push(record.clone());
        self.pl_history.insert(0, delta);
        self.pl_history.truncate(PL_HISTORY_LEN);
        if let Some(seq) = outcome.seq {
            self.last_seq = Some(seq);
        }

        let skip_reason = match gate {
            Err(reason) => Some(reason.to_string()),
            Ok(()) if neutral => Some("neutral round".to_string()),
            Ok(()) => None,
        };

        let output = SettlementOutput {
            suggested: target,
            confidence,
            rationale: prediction.rationale,
            bet,
            success,
            delta,
            balance: self.ledger.balance,
            profit: self.ledger.profit,
            wins: self.ledger.wins,
            losses: self.ledger.losses,
            small_acc: self.ledger.small_accuracy(),
            cooldown_rounds_remaining: self.risk_state.cooldown_remaining,
            skip_reason,
            record,
        };

        info!(
            outcome = format!("{:.2}x", value),
            suggested = format!("{:.2}x", target),
            confidence = format!("{:.0}%", confidence * 100.0),
            bet = %bet,
            success,
            delta = %delta,
            balance = %self.ledger.balance,
            cooldown = self.risk_state.cooldown_remaining,
            skip = output.skip_reason.as_deref().unwrap_or("-"),
            "Round settled"
        );

        self.latest = Some(output.clone());
        Ok(output)
    }

    fn validate(&self, outcome: &RoundOutcome) -> Result<(), OracleError> {
        if !outcome.value.is_finite() || outcome.value < 1.0 {
            return Err(OracleError::MalformedOutcome(format!(
                "multiplier {} is not a number >= 1",
                outcome.value
            )));
        }
        if let (Some(seq), Some(last)) = (outcome.seq, self.last_seq) {
            if seq <= last {
                warn!(seq, last, "Duplicate round rejected");
                return Err(OracleError::DuplicateRound { seq, last });
            }
        }
        if let Some(newest) = self.history.newest() {
            if outcome.time < newest.time {
                warn!(time = %outcome.time, newest = %newest.time, "Stale round rejected");
                return Err(OracleError::StaleRound {
                    time: outcome.time,
                    newest: newest.time,
                });
            }
        }
        Ok(())
    }

    fn predict(&mut self) -> Prediction {
        SafeCashoutPredictor::new(
            &self.settings.predictor,
            self.settings.mode,
            self.settings.auto_tune,
        )
        .predict(self.history.records(), self.small_accuracy(), &mut self.predictor_state)
    }

    fn small_accuracy(&self) -> SmallAccuracy {
        SmallAccuracy {
            pct: self.ledger.small_accuracy(),
            decisions: self.ledger.small_decisions(),
        }
    }

    /// What the next round's target would be, without advancing smoothing.
    pub fn preview(&self) -> Prediction {
        let mut state = self.predictor_state;
        SafeCashoutPredictor::new(
            &self.settings.predictor,
            self.settings.mode,
            self.settings.auto_tune,
        )
        .predict(self.history.records(), self.small_accuracy(), &mut state)
    }

    /// Last target actually published.
    pub fn current_target(&self) -> f64 {
        self.predictor_state.last_published
    }

    // -- Ledger extras -----------------------------------------------------

    pub fn eta(&self) -> Option<HighEta> {
        eta::estimate(self.history.records())
    }

    /// Balance := start balance; P/L history cleared.
    pub fn reset_balance(&mut self) {
        info!(start_balance = %self.ledger.start_balance, "Balance reset");
        self.ledger.balance = self.ledger.start_balance;
        self.ledger.profit = Decimal::ZERO;
        self.pl_history.clear();
    }

    pub fn reset_daily_baseline(&mut self, now: DateTime<Utc>) {
        self.daily = DailyBaseline {
            date: now.date_naive(),
            balance: self.ledger.balance,
        };
    }

    fn roll_daily(&mut self, date: NaiveDate) {
        if date != self.daily.date {
            debug!(%date, balance = %self.ledger.balance, "New day, daily baseline rebased");
            self.daily = DailyBaseline {
                date,
                balance: self.ledger.balance,
            };
        }
    }

    /// Profit or loss since the start of the day.
    pub fn daily_pl(&self) -> Decimal {
        self.ledger.balance - self.daily.balance
    }

    /// Start balance followed by cumulative P/L, oldest first, last 20 points.
    pub fn equity_curve(&self) -> Vec<Decimal> {
        let mut equity = self.ledger.start_balance;
        let mut curve = vec![equity];
        for delta in self.pl_history.iter().rev() {
            equity += *delta;
            curve.push(equity.round_dp(2));
        }
        let skip = curve.len().saturating_sub(EQUITY_POINTS);
        curve.split_off(skip)
    }

    pub fn backtest_summary(&self) -> Option<BacktestSummary> {
        summarize(self.history.records())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
