//! Stake sizing.
//!
//! Turns the published target and its confidence into a stake fraction and
//! a whole-unit wager, under one of three strategies: a fixed fraction,
//! Kelly on the predictor's confidence, or a recovery ladder that grows the
//! fraction after placed losses.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::risk::WagerOutcome;
use crate::config::EngineSettings;
use crate::types::{Mode, StakeStrategy};

/// Hard ceiling the auto-tune increments never exceed.
const AUTO_TUNE_MAX_RISK: f64 = 0.05;

/// Smallest net odds Kelly will consider.
const MIN_NET_ODDS: f64 = 0.02;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StakeConfig {
    pub strategy: StakeStrategy,
    pub mode: Mode,
    /// Base fraction of balance (0.02 = 2%).
    pub risk_pct: f64,
    pub auto_tune: bool,
    /// When set, low confidence is left to the risk guard instead of zeroing
    /// the stake here.
    pub auto_skip: bool,
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for StakeConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            strategy: settings.stake_strategy,
            mode: settings.mode,
            risk_pct: settings.risk_pct,
            auto_tune: settings.auto_tune,
            auto_skip: settings.auto_skip,
        }
    }
}

// ---------------------------------------------------------------------------
// State and output
// ---------------------------------------------------------------------------

/// Sizing state carried across rounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeState {
    /// Recovery multiplier on the base fraction. Always 1 outside the
    /// recovery strategy.
    pub recovery_boost: f64,
}

impl Default for StakeState {
    fn default() -> Self {
        Self { recovery_boost: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeDecision {
    /// Effective fraction of balance after strategy caps and auto-tune.
    pub eff_risk: f64,
    /// Whole-unit wager, capped at the balance. Zero when nothing is staked.
    pub amount: Decimal,
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct StakeSizer {
    config: StakeConfig,
}

impl StakeSizer {
    pub fn new(config: StakeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StakeConfig {
        &self.config
    }

    /// Effective stake fraction for the given confidence and target.
    pub fn effective_risk(&self, confidence: f64, target: f64, state: &StakeState) -> f64 {
        let mode = self.config.mode;
        let p = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };

        let mut risk = match self.config.strategy {
            StakeStrategy::Fixed => self.config.risk_pct,
            StakeStrategy::Kelly => {
                let b = (target - 1.0).max(MIN_NET_ODDS);
                let kelly = p - (1.0 - p) / b;
                if kelly.is_finite() {
                    kelly.clamp(0.0, mode.kelly_cap())
                } else {
                    0.0
                }
            }
            StakeStrategy::Recovery => {
                let boosted = self.config.risk_pct * state.recovery_boost;
                if boosted.is_finite() {
                    boosted.clamp(0.0, mode.recovery_cap())
                } else {
                    0.0
                }
            }
        };

        if self.config.auto_tune {
            risk = if p >= 0.7 {
                AUTO_TUNE_MAX_RISK.min(risk + 0.005)
            } else if p >= 0.5 {
                AUTO_TUNE_MAX_RISK.min(risk + 0.0025)
            } else if p >= 0.4 {
                (risk * 0.5).max(0.0)
            } else if !self.config.auto_skip {
                0.0
            } else {
                risk
            };
        }

        risk.max(0.0)
    }

    /// Size the wager: `max(1, floor(balance * eff_risk))`, capped at the
    /// balance. A non-positive fraction or empty balance stakes nothing.
    pub fn size(
        &self,
        confidence: f64,
        target: f64,
        balance: Decimal,
        state: &StakeState,
    ) -> StakeDecision {
        let eff_risk = self.effective_risk(confidence, target, state);
        if eff_risk <= 0.0 || balance <= Decimal::ZERO {
            return StakeDecision {
                eff_risk,
                amount: Decimal::ZERO,
            };
        }

        let fraction = Decimal::from_f64(eff_risk).unwrap_or(Decimal::ZERO);
        let amount = (balance * fraction).floor().max(Decimal::ONE).min(balance);

        debug!(
            strategy = %self.config.strategy,
            eff_risk = format!("{:.2}%", eff_risk * 100.0),
            amount = %amount,
            boost = state.recovery_boost,
            "Stake sized"
        );

        StakeDecision { eff_risk, amount }
    }

    /// Advance the recovery boost after settlement.
    pub fn record_settlement(&self, state: &mut StakeState, outcome: WagerOutcome) {
        if self.config.strategy != StakeStrategy::Recovery {
            state.recovery_boost = 1.0;
            return;
        }
        let mode = self.config.mode;
        match outcome {
            WagerOutcome::Lost => {
                state.recovery_boost =
                    (state.recovery_boost * mode.recovery_factor()).min(mode.max_recovery_boost());
            }
            WagerOutcome::Won => state.recovery_boost = 1.0,
            WagerOutcome::Skipped => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
