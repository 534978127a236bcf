//! Strategy: cashout prediction, high-multiplier ETA, stake sizing and
//! the risk guard.
//!
//! Everything here is synchronous arithmetic over a history snapshot; the
//! settlement engine owns the state these functions advance.

pub mod eta;
pub mod predictor;
pub mod risk;
pub mod stake;

pub use predictor::{Prediction, PredictorState, PredictorTuning, SafeCashoutPredictor};
pub use risk::{GuardPhase, RiskGuard, RiskLimits, RiskState, SkipReason, WagerOutcome};
pub use stake::{StakeConfig, StakeDecision, StakeSizer, StakeState};
