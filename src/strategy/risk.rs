//! Risk guard.
//!
//! Gates every wager behind the session loss cap, the consecutive-loss
//! cooldown and the auto-skip confidence floor. The guard is a small state
//! machine: `Active` or `Cooldown(n)`, advanced once per settled round.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::strategy::predictor::MIN_TARGET;
use crate::types::LedgerState;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// Session loss cap in percent of the start balance. 0 disables.
    pub loss_cap_pct: f64,
    pub cooldown_after: u32,
    pub cooldown_len: u32,
    pub auto_skip: bool,
    pub auto_skip_threshold: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for RiskLimits {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            loss_cap_pct: settings.loss_cap_pct,
            cooldown_after: settings.cooldown_after,
            cooldown_len: settings.cooldown_len,
            auto_skip: settings.auto_skip,
            auto_skip_threshold: settings.auto_skip_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub cooldown_remaining: u32,
    /// Consecutive wagered losses. Skipped rounds neither extend nor break it.
    pub loss_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "rounds", rename_all = "lowercase")]
pub enum GuardPhase {
    Active,
    Cooldown(u32),
}

impl RiskState {
    pub fn phase(&self) -> GuardPhase {
        if self.cooldown_remaining > 0 {
            GuardPhase::Cooldown(self.cooldown_remaining)
        } else {
            GuardPhase::Active
        }
    }
}

/// How a settled round touched the bankroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WagerOutcome {
    /// No stake was placed (gated, or a neutral round).
    Skipped,
    Won,
    Lost,
}

/// A stake the engine would like to place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WagerProposal {
    pub target: f64,
    pub confidence: f64,
    pub eff_risk: f64,
    pub amount: Decimal,
}

/// Why a round was not wagered.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    TargetTooLow { target: f64 },
    LossCap { session_loss: Decimal, max_loss: Decimal },
    Cooldown { remaining: u32 },
    ZeroRisk,
    NoBalance,
    LowConfidence { confidence: f64, threshold: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TargetTooLow { target } => write!(f, "target {target:.2}x below minimum"),
            SkipReason::LossCap {
                session_loss,
                max_loss,
            } => write!(f, "session loss {session_loss:.2} reached cap {max_loss:.2}"),
            SkipReason::Cooldown { remaining } => write!(f, "cooldown ({remaining} rounds left)"),
            SkipReason::ZeroRisk => write!(f, "zero effective risk"),
            SkipReason::NoBalance => write!(f, "no balance to stake"),
            SkipReason::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "confidence {:.0}% below auto-skip threshold {:.0}%",
                confidence * 100.0,
                threshold * 100.0
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct RiskGuard {
    limits: RiskLimits,
}

impl RiskGuard {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Maximum session loss allowed, or zero when the cap is disabled.
    pub fn max_loss(&self, ledger: &LedgerState) -> Decimal {
        let pct = Decimal::from_f64(self.limits.loss_cap_pct.max(0.0)).unwrap_or(Decimal::ZERO);
        ledger.start_balance * pct / Decimal::ONE_HUNDRED
    }

    pub fn cap_hit(&self, ledger: &LedgerState) -> bool {
        let max_loss = self.max_loss(ledger);
        max_loss > Decimal::ZERO && ledger.session_loss() >= max_loss
    }

    /// Decide whether `proposal` may be wagered against the current ledger.
    pub fn gate(
        &self,
        state: &RiskState,
        proposal: &WagerProposal,
        ledger: &LedgerState,
    ) -> Result<(), SkipReason> {
        if proposal.target.is_nan() || proposal.target < MIN_TARGET {
            return Err(SkipReason::TargetTooLow {
                target: proposal.target,
            });
        }
        if self.cap_hit(ledger) {
            return Err(SkipReason::LossCap {
                session_loss: ledger.session_loss(),
                max_loss: self.max_loss(ledger),
            });
        }
        if state.cooldown_remaining > 0 {
            return Err(SkipReason::Cooldown {
                remaining: state.cooldown_remaining,
            });
        }
        if proposal.eff_risk <= 0.0 {
            return Err(SkipReason::ZeroRisk);
        }
        if proposal.amount <= Decimal::ZERO {
            return Err(SkipReason::NoBalance);
        }
        if self.limits.auto_skip && proposal.confidence < self.limits.auto_skip_threshold {
            return Err(SkipReason::LowConfidence {
                confidence: proposal.confidence,
                threshold: self.limits.auto_skip_threshold,
            });
        }
        Ok(())
    }

    /// Advance the guard after a round settled. `ledger` is post-settlement.
    pub fn advance(&self, state: &mut RiskState, outcome: WagerOutcome, ledger: &LedgerState) {
        match outcome {
            WagerOutcome::Lost => state.loss_streak += 1,
            WagerOutcome::Won => state.loss_streak = 0,
            WagerOutcome::Skipped => {}
        }

        let streak_limit = self.limits.cooldown_after.max(1);
        if self.cap_hit(ledger) {
            if state.cooldown_remaining < self.limits.cooldown_len {
                warn!(
                    session_loss = %ledger.session_loss(),
                    max_loss = %self.max_loss(ledger),
                    "Loss cap reached, wagering halted"
                );
            }
            state.cooldown_remaining = state.cooldown_remaining.max(self.limits.cooldown_len);
        } else if outcome == WagerOutcome::Lost && state.loss_streak >= streak_limit {
            info!(
                streak = state.loss_streak,
                rounds = self.limits.cooldown_len,
                "Loss streak, entering cooldown"
            );
            state.cooldown_remaining = state.cooldown_remaining.max(self.limits.cooldown_len);
            // A fresh streak is needed to trigger again.
            state.loss_streak = 0;
        } else {
            state.cooldown_remaining = state.cooldown_remaining.saturating_sub(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
