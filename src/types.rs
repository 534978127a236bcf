//! Shared types for the cashout oracle.
//!
//! These types form the data model used across all modules: the round
//! events coming off the feed, the per-round prediction records kept in
//! history, the simulated ledger, and the knobs that select the sizing
//! policy. Strategy and engine modules depend on them without depending
//! on each other.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multipliers at or below this value are neutral rounds.
pub const NEUTRAL_MULTIPLIER: f64 = 1.02;

/// Upper edge of the small bucket (inclusive).
pub const SMALL_BUCKET_MAX: f64 = 1.99;

/// Upper edge of the medium bucket (inclusive).
pub const MEDIUM_BUCKET_MAX: f64 = 10.0;

/// Round to two decimals, the precision every published multiplier uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Round events and records
// ---------------------------------------------------------------------------

/// A completed round as delivered by the feed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Terminal multiplier of the round (≥ 1).
    pub value: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    /// Feed-assigned sequence number, when the feed provides one.
    #[serde(default)]
    pub seq: Option<u64>,
}

impl RoundOutcome {
    pub fn new(value: f64, time: DateTime<Utc>) -> Self {
        Self { value, time, seq: None }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Whether the round is too low to count as a win or loss.
    pub fn is_neutral(&self) -> bool {
        self.value <= NEUTRAL_MULTIPLIER
    }
}

/// One settled round, as kept in history (newest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Final multiplier, rounded to two decimals.
    #[serde(rename = "final")]
    pub final_value: f64,
    /// Target that was published for this round.
    pub suggested: f64,
    /// Stake placed. Zero means the round was skipped.
    pub bet: Decimal,
    pub success: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

impl PredictionRecord {
    /// Whether a stake was actually placed on this round.
    pub fn is_wagered(&self) -> bool {
        self.bet > Decimal::ZERO
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::of(self.final_value)
    }
}

impl fmt::Display for PredictionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}x (target {:.2}x, bet {}, {})",
            self.final_value,
            self.suggested,
            self.bet,
            if self.success { "hit" } else { "miss" },
        )
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome ranges used by the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Small,
    Medium,
    High,
}

impl Bucket {
    /// Classify a multiplier. Values below the small range fall into `Small`
    /// for mix counting purposes; the predictor filters them separately.
    pub fn of(value: f64) -> Self {
        if value <= SMALL_BUCKET_MAX {
            Bucket::Small
        } else if value <= MEDIUM_BUCKET_MAX {
            Bucket::Medium
        } else {
            Bucket::High
        }
    }
}

/// Risk appetite. Shifts divisors, safety factors, caps and sizing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Safe,
    #[default]
    Normal,
    Aggressive,
}

impl Mode {
    pub const ALL: &'static [Mode] = &[Mode::Safe, Mode::Normal, Mode::Aggressive];

    /// Multiplier applied to every bucket's base safety divisor.
    pub fn divisor_multiplier(self) -> f64 {
        match self {
            Mode::Safe => 1.1,
            Mode::Normal => 1.0,
            Mode::Aggressive => 0.9,
        }
    }

    /// Fixed haircut applied to the smoothed target.
    pub fn safety_factor(self) -> f64 {
        match self {
            Mode::Safe => 0.965,
            Mode::Normal => 0.975,
            Mode::Aggressive => 0.985,
        }
    }

    /// Adjustment to the regime's maximum target.
    pub fn cap_adjustment(self) -> f64 {
        match self {
            Mode::Safe => -0.1,
            Mode::Normal => 0.0,
            Mode::Aggressive => 0.1,
        }
    }

    /// Ceiling on the Kelly stake fraction.
    pub fn kelly_cap(self) -> f64 {
        match self {
            Mode::Safe => 0.02,
            Mode::Normal => 0.03,
            Mode::Aggressive => 0.05,
        }
    }

    /// Ceiling on the boosted recovery stake fraction.
    pub fn recovery_cap(self) -> f64 {
        match self {
            Mode::Safe => 0.03,
            Mode::Normal => 0.05,
            Mode::Aggressive => 0.07,
        }
    }

    /// Growth factor of the recovery boost after a placed loss.
    pub fn recovery_factor(self) -> f64 {
        match self {
            Mode::Safe => 1.3,
            Mode::Normal => 1.5,
            Mode::Aggressive => 1.8,
        }
    }

    pub fn max_recovery_boost(self) -> f64 {
        match self {
            Mode::Safe => 1.7,
            Mode::Normal => 2.0,
            Mode::Aggressive => 2.5,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Safe => write!(f, "safe"),
            Mode::Normal => write!(f, "normal"),
            Mode::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "safe" | "conservative" => Ok(Mode::Safe),
            "normal" | "default" => Ok(Mode::Normal),
            "aggressive" => Ok(Mode::Aggressive),
            other => Err(OracleError::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// How stakes are sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StakeStrategy {
    #[default]
    Fixed,
    Kelly,
    Recovery,
}

impl fmt::Display for StakeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakeStrategy::Fixed => write!(f, "fixed"),
            StakeStrategy::Kelly => write!(f, "kelly"),
            StakeStrategy::Recovery => write!(f, "recovery"),
        }
    }
}

impl std::str::FromStr for StakeStrategy {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" | "fixed%" => Ok(StakeStrategy::Fixed),
            "kelly" => Ok(StakeStrategy::Kelly),
            "recovery" | "2-step" => Ok(StakeStrategy::Recovery),
            other => Err(OracleError::Config(format!("unknown stake strategy: {other}"))),
        }
    }
}

/// Volatility regime of the small bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Stable,
    Normal,
    Volatile,
}

impl Regime {
    /// Classify from the weighted standard deviation of small outcomes.
    pub fn from_std(std: f64) -> Self {
        if std <= 0.15 {
            Regime::Stable
        } else if std >= 0.25 {
            Regime::Volatile
        } else {
            Regime::Normal
        }
    }

    /// Maximum target before the mode adjustment.
    pub fn max_target(self) -> f64 {
        match self {
            Regime::Stable => 1.9,
            Regime::Normal => 1.8,
            Regime::Volatile => 1.7,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Stable => write!(f, "stable"),
            Regime::Normal => write!(f, "normal"),
            Regime::Volatile => write!(f, "volatile"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Simulated bankroll and scoring counters.
///
/// `wins`/`losses` score every non-neutral prediction (wagered or not);
/// `small_wins`/`small_loss` do the same for outcomes in the small bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub balance: Decimal,
    pub start_balance: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub profit: Decimal,
    pub small_wins: u64,
    pub small_loss: u64,
}

impl LedgerState {
    pub fn new(start_balance: Decimal) -> Self {
        let start_balance = start_balance.max(Decimal::ZERO);
        Self {
            balance: start_balance,
            start_balance,
            wins: 0,
            losses: 0,
            profit: Decimal::ZERO,
            small_wins: 0,
            small_loss: 0,
        }
    }

    /// Prediction accuracy as a percentage (one decimal). 0 when unscored.
    pub fn accuracy(&self) -> f64 {
        percent(self.wins, self.losses)
    }

    /// Small-bucket accuracy as a percentage (one decimal).
    pub fn small_accuracy(&self) -> f64 {
        percent(self.small_wins, self.small_loss)
    }

    pub fn small_decisions(&self) -> u64 {
        self.small_wins + self.small_loss
    }

    /// Return on the start balance, in percent.
    pub fn roi_pct(&self) -> f64 {
        if self.start_balance <= Decimal::ZERO {
            return 0.0;
        }
        let roi = (self.balance - self.start_balance) / self.start_balance * Decimal::ONE_HUNDRED;
        (roi.to_f64().unwrap_or(0.0) * 10.0).round() / 10.0
    }

    /// Session loss relative to the start balance (never negative).
    pub fn session_loss(&self) -> Decimal {
        (self.start_balance - self.balance).max(Decimal::ZERO)
    }
}

fn percent(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        ((hits as f64 / total as f64) * 1000.0).round() / 10.0
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance={:.2} | profit={:.2} | W{}/L{} ({:.1}%) | small {:.1}%",
            self.balance,
            self.profit,
            self.wins,
            self.losses,
            self.accuracy(),
            self.small_accuracy(),
        )
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Everything the display needs after one settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementOutput {
    pub suggested: f64,
    pub confidence: f64,
    pub rationale: String,
    pub bet: Decimal,
    pub success: bool,
    pub delta: Decimal,
    pub balance: Decimal,
    pub profit: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub small_acc: f64,
    pub cooldown_rounds_remaining: u32,
    /// Why the round was not wagered, when it was not.
    pub skip_reason: Option<String>,
    pub record: PredictionRecord,
}

impl fmt::Display for SettlementOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | delta={:+.2} | balance={:.2} | conf={:.0}% | cooldown={}",
            self.record,
            self.delta,
            self.balance,
            self.confidence * 100.0,
            self.cooldown_rounds_remaining,
        )
    }
}

/// Estimated arrival of the next ≥10x round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighEta {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub predicted_at: DateTime<Utc>,
    pub avg_gap_ms: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_at: DateTime<Utc>,
}

impl HighEta {
    /// Milliseconds until the predicted time (negative when overdue).
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.predicted_at - now).num_milliseconds()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Malformed outcome: {0}")]
    MalformedOutcome(String),

    #[error("Duplicate round: sequence {seq} already settled (last {last})")]
    DuplicateRound { seq: u64, last: u64 },

    #[error("Stale round at {time}: newest recorded outcome is at {newest}")]
    StaleRound {
        time: DateTime<Utc>,
        newest: DateTime<Utc>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
