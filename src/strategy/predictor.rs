//! Safe cashout prediction.
//!
//! Turns the recent round history into a smoothed, confidence-scored
//! target multiplier. Small outcomes (1.02–1.99) drive the estimate via
//! recency-weighted quantiles; medium and high outcomes contribute capped
//! averages, weighted by how often each bucket showed up lately.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{
    round2, Bucket, Mode, PredictionRecord, Regime, NEUTRAL_MULTIPLIER, SMALL_BUCKET_MAX,
};

/// Target published when there is nothing to learn from.
pub const DEFAULT_TARGET: f64 = 1.2;

/// Lowest target ever published.
pub const MIN_TARGET: f64 = 1.02;

/// Largest move of the published target between two rounds.
pub const MAX_STEP: f64 = 0.15;

const SMALL_LIMIT: usize = 500;
const MEDIUM_LIMIT: usize = 300;
const HIGH_LIMIT: usize = 200;

/// Recency decay constant: weight = exp(-i / TAU).
const TAU: f64 = 20.0;

const MEDIUM_SAMPLE_CAP: f64 = 8.0;
const HIGH_SAMPLE_CAP: f64 = 25.0;

const MIX_WINDOW: usize = 30;
const MIX_RECENT: usize = 5;

/// Low-confidence widening of each bucket's divisor.
const SMALL_PENALTY: f64 = 0.25;
const MEDIUM_PENALTY: f64 = 0.2;
const HIGH_PENALTY: f64 = 0.4;

const UNDERCUT_WINDOW: usize = 20;
const UNDERCUT_MAX: f64 = 0.12;

const AUTO_TUNE_STEP: f64 = 0.05;

// ---------------------------------------------------------------------------
// Tuning
// ---------------------------------------------------------------------------

/// Knobs for one volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeTuning {
    /// Lower confidence-interval bound (informational, for downstream policy).
    pub lo: f64,
    /// Upper confidence-interval bound.
    pub hi: f64,
    pub small_divisor: f64,
    pub medium_divisor: f64,
    pub high_divisor: f64,
    /// Smoothing blend weight for the newest estimate.
    pub alpha: f64,
}

impl RegimeTuning {
    pub fn stable() -> Self {
        Self {
            lo: 0.88,
            hi: 0.98,
            small_divisor: 1.5,
            medium_divisor: 2.4,
            high_divisor: 4.0,
            alpha: 0.35,
        }
    }

    pub fn normal() -> Self {
        Self {
            lo: 0.80,
            hi: 0.97,
            small_divisor: 1.6,
            medium_divisor: 2.4,
            high_divisor: 4.0,
            alpha: 0.3,
        }
    }

    pub fn volatile() -> Self {
        Self {
            lo: 0.72,
            hi: 0.95,
            small_divisor: 1.75,
            medium_divisor: 2.4,
            high_divisor: 4.0,
            alpha: 0.25,
        }
    }

    fn sanitize(self, regime: Regime, fallback: RegimeTuning) -> Self {
        let positive = |value: f64, default: f64, name: &str| {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                warn!(%regime, field = name, value, "Invalid predictor tuning, using default");
                default
            }
        };
        let small_divisor = positive(self.small_divisor, fallback.small_divisor, "small_divisor");
        let medium_divisor = positive(self.medium_divisor, fallback.medium_divisor, "medium_divisor");
        let high_divisor = positive(self.high_divisor, fallback.high_divisor, "high_divisor");
        let alpha = positive(self.alpha, fallback.alpha, "alpha").min(1.0);
        let lo = if self.lo.is_finite() { self.lo.clamp(0.0, 1.0) } else { fallback.lo };
        let hi = if self.hi.is_finite() { self.hi.clamp(0.0, 1.0) } else { fallback.hi };
        Self {
            lo: lo.min(hi),
            hi: hi.max(lo),
            small_divisor,
            medium_divisor,
            high_divisor,
            alpha,
        }
    }
}

/// Per-regime predictor configuration. Read-only during prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartialTuning")]
pub struct PredictorTuning {
    pub stable: RegimeTuning,
    pub normal: RegimeTuning,
    pub volatile: RegimeTuning,
}

impl Default for PredictorTuning {
    fn default() -> Self {
        Self {
            stable: RegimeTuning::stable(),
            normal: RegimeTuning::normal(),
            volatile: RegimeTuning::volatile(),
        }
    }
}

impl PredictorTuning {
    pub fn regime(&self, regime: Regime) -> &RegimeTuning {
        match regime {
            Regime::Stable => &self.stable,
            Regime::Normal => &self.normal,
            Regime::Volatile => &self.volatile,
        }
    }

    pub fn sanitize(self) -> Self {
        Self {
            stable: self.stable.sanitize(Regime::Stable, RegimeTuning::stable()),
            normal: self.normal.sanitize(Regime::Normal, RegimeTuning::normal()),
            volatile: self.volatile.sanitize(Regime::Volatile, RegimeTuning::volatile()),
        }
    }
}

/// Deserialization shape: any field may be omitted and falls back to
/// that regime's own default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialTuning {
    stable: PartialRegime,
    normal: PartialRegime,
    volatile: PartialRegime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialRegime {
    lo: Option<f64>,
    hi: Option<f64>,
    small_divisor: Option<f64>,
    medium_divisor: Option<f64>,
    high_divisor: Option<f64>,
    alpha: Option<f64>,
}

impl PartialRegime {
    fn over(self, base: RegimeTuning) -> RegimeTuning {
        RegimeTuning {
            lo: self.lo.unwrap_or(base.lo),
            hi: self.hi.unwrap_or(base.hi),
            small_divisor: self.small_divisor.unwrap_or(base.small_divisor),
            medium_divisor: self.medium_divisor.unwrap_or(base.medium_divisor),
            high_divisor: self.high_divisor.unwrap_or(base.high_divisor),
            alpha: self.alpha.unwrap_or(base.alpha),
        }
    }
}

impl From<PartialTuning> for PredictorTuning {
    fn from(partial: PartialTuning) -> Self {
        Self {
            stable: partial.stable.over(RegimeTuning::stable()),
            normal: partial.normal.over(RegimeTuning::normal()),
            volatile: partial.volatile.over(RegimeTuning::volatile()),
        }
    }
}

// ---------------------------------------------------------------------------
// State and output
// ---------------------------------------------------------------------------

/// Smoothing state carried from one prediction to the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorState {
    /// Exponentially smoothed blend, before nudges and clamps.
    pub smoothed: f64,
    /// Last target actually published (after clamp, limiter and rounding).
    pub last_published: f64,
    /// Confidence of the last prediction.
    pub confidence: f64,
}

impl Default for PredictorState {
    fn default() -> Self {
        Self {
            smoothed: DEFAULT_TARGET,
            last_published: DEFAULT_TARGET,
            confidence: 0.0,
        }
    }
}

/// Small-bucket scoring the auto-tune nudge looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmallAccuracy {
    /// Accuracy in percent.
    pub pct: f64,
    pub decisions: u64,
}

/// Normalized bucket weights from recent rounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketMix {
    pub small: f64,
    pub medium: f64,
    pub high: f64,
}

/// A published recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Target multiplier, two decimals.
    pub target: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub regime: Regime,
    /// Confidence-interval band of the selected regime.
    pub band: (f64, f64),
    pub mix: BucketMix,
    /// Human-readable summary, for observability only.
    pub rationale: String,
}

/// Weighted statistics of the small bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SmallStats {
    n_eff: f64,
    q85: f64,
    q90: f64,
    q95: f64,
    mean: f64,
    std: f64,
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Computes the safe cashout target from a history snapshot.
pub struct SafeCashoutPredictor<'a> {
    tuning: &'a PredictorTuning,
    mode: Mode,
    auto_tune: bool,
}

impl<'a> SafeCashoutPredictor<'a> {
    pub fn new(tuning: &'a PredictorTuning, mode: Mode, auto_tune: bool) -> Self {
        Self {
            tuning,
            mode,
            auto_tune,
        }
    }

    /// Predict the next target from `history` (newest first) and advance
    /// the smoothing state.
    pub fn predict(
        &self,
        history: &[PredictionRecord],
        small_accuracy: SmallAccuracy,
        state: &mut PredictorState,
    ) -> Prediction {
        // Positions index into the whole history so recency weights reflect
        // how long ago the round happened, not its rank within a bucket.
        let values: Vec<(usize, f64)> = history
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.final_value))
            .filter(|(_, v)| v.is_finite())
            .collect();

        let small: Vec<(usize, f64)> = values
            .iter()
            .copied()
            .filter(|(_, v)| *v >= NEUTRAL_MULTIPLIER && *v <= SMALL_BUCKET_MAX)
            .take(SMALL_LIMIT)
            .collect();
        let medium: Vec<f64> = values
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| Bucket::of(*v) == Bucket::Medium)
            .take(MEDIUM_LIMIT)
            .collect();
        let high: Vec<f64> = values
            .iter()
            .map(|(_, v)| *v)
            .filter(|v| Bucket::of(*v) == Bucket::High)
            .take(HIGH_LIMIT)
            .collect();

        if small.is_empty() && medium.is_empty() && high.is_empty() {
            let target = self.limit(DEFAULT_TARGET, state.last_published);
            state.last_published = target;
            state.confidence = 0.0;
            let tuning = self.tuning.regime(Regime::Normal);
            return Prediction {
                target,
                confidence: 0.0,
                regime: Regime::Normal,
                band: (tuning.lo, tuning.hi),
                mix: BucketMix {
                    small: 0.0,
                    medium: 0.0,
                    high: 0.0,
                },
                rationale: "insufficient data".to_string(),
            };
        }

        let stats = small_stats(&small);
        let regime = Regime::from_std(stats.std);
        let tuning = self.tuning.regime(regime);

        let small_est = 0.6 * stats.q90 + 0.25 * stats.q85 + 0.15 * stats.mean;
        let medium_est = capped_mean(&medium, MEDIUM_SAMPLE_CAP);
        let high_est = capped_mean(&high, HIGH_SAMPLE_CAP);

        let mix = bucket_mix(&values);

        let conf_size = (stats.n_eff / 50.0).clamp(0.0, 1.0);
        let conf_vol = (0.35 / stats.std.max(0.12)).clamp(0.0, 1.0);
        let confidence = (0.6 * conf_size + 0.4 * conf_vol).clamp(0.0, 1.0);

        let mode_mul = self.mode.divisor_multiplier();
        let div_small = tuning.small_divisor * mode_mul + (1.0 - confidence) * SMALL_PENALTY;
        let div_medium = tuning.medium_divisor * mode_mul + (1.0 - confidence) * MEDIUM_PENALTY;
        let div_high = tuning.high_divisor * mode_mul + (1.0 - confidence) * HIGH_PENALTY;

        let blended = mix.small * safe_div(small_est, div_small)
            + mix.medium * safe_div(medium_est, div_medium)
            + mix.high * safe_div(high_est, div_high);

        let previous = if state.smoothed.is_finite() {
            state.smoothed
        } else {
            DEFAULT_TARGET
        };
        let mut smoothed = tuning.alpha * blended + (1.0 - tuning.alpha) * previous;
        state.smoothed = smoothed;
        state.confidence = confidence;

        let penalty = 1.0 - (undercut_rate(history) * UNDERCUT_MAX).min(UNDERCUT_MAX);

        if self.auto_tune {
            if confidence >= 0.7 {
                smoothed += AUTO_TUNE_STEP;
            } else if (0.4..0.5).contains(&confidence) {
                smoothed -= AUTO_TUNE_STEP;
            }
            if small_accuracy.pct > 0.0 && small_accuracy.pct < 60.0 && small_accuracy.decisions >= 10 {
                smoothed -= AUTO_TUNE_STEP;
            }
        }

        let raw = smoothed * self.mode.safety_factor() * penalty;
        let max_cap = regime.max_target() + self.mode.cap_adjustment();
        let clamped = if raw.is_finite() {
            raw.clamp(MIN_TARGET, max_cap)
        } else {
            DEFAULT_TARGET
        };
        let target = self.limit(clamped, state.last_published);
        state.last_published = target;

        let rationale = format!(
            "small q90={:.2}, std={:.2}, conf={:.0}%, mix S:{:.0} M:{:.0} H:{:.0}",
            stats.q90,
            stats.std,
            confidence * 100.0,
            mix.small * 100.0,
            mix.medium * 100.0,
            mix.high * 100.0,
        );

        debug!(
            target,
            raw,
            confidence,
            %regime,
            n_eff = stats.n_eff,
            q95 = stats.q95,
            penalty,
            "Prediction computed"
        );

        Prediction {
            target,
            confidence,
            regime,
            band: (tuning.lo, tuning.hi),
            mix,
            rationale,
        }
    }

    /// Anti-spike limiter: stay within `MAX_STEP` of the last published
    /// target, then round to two decimals.
    fn limit(&self, value: f64, last_published: f64) -> f64 {
        let last = if last_published.is_finite() {
            last_published
        } else {
            DEFAULT_TARGET
        };
        round2(value.clamp(last - MAX_STEP, last + MAX_STEP))
    }
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && denominator.is_finite() {
        numerator / denominator
    } else {
        0.0
    }
}

fn small_stats(small: &[(usize, f64)]) -> SmallStats {
    if small.is_empty() {
        return SmallStats {
            n_eff: 0.0,
            q85: DEFAULT_TARGET,
            q90: DEFAULT_TARGET,
            q95: DEFAULT_TARGET,
            mean: DEFAULT_TARGET,
            std: 0.2,
        };
    }

    let mut weighted: Vec<(f64, f64)> = small
        .iter()
        .map(|(i, v)| (*v, (-(*i as f64) / TAU).exp()))
        .collect();
    let sum_w: f64 = weighted.iter().map(|(_, w)| w).sum();
    let sum_w2: f64 = weighted.iter().map(|(_, w)| w * w).sum();
    let n_eff = if sum_w2 > 0.0 { sum_w * sum_w / sum_w2 } else { 0.0 };

    weighted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let quantile = |p: f64| -> f64 {
        let threshold = p.clamp(0.0, 1.0) * sum_w;
        let mut acc = 0.0;
        for (v, w) in &weighted {
            acc += w;
            if acc >= threshold {
                return *v;
            }
        }
        weighted.last().map(|(v, _)| *v).unwrap_or(DEFAULT_TARGET)
    };

    let (mean, variance) = if sum_w > 0.0 {
        let mean = weighted.iter().map(|(v, w)| v * w).sum::<f64>() / sum_w;
        let variance = weighted.iter().map(|(v, w)| w * (v - mean).powi(2)).sum::<f64>() / sum_w;
        (mean, variance)
    } else {
        (DEFAULT_TARGET, 0.04)
    };

    SmallStats {
        n_eff,
        q85: quantile(0.85),
        q90: quantile(0.90),
        q95: quantile(0.95),
        mean,
        std: variance.max(0.0).sqrt(),
    }
}

fn capped_mean(values: &[f64], cap: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| v.min(cap)).sum::<f64>() / values.len() as f64
}

/// Bucket frequencies over the last 30 rounds, with the last five counted
/// again at 0.6 / 0.8 / 1.0 extra weight.
fn bucket_mix(values: &[(usize, f64)]) -> BucketMix {
    let extra = |bucket: Bucket| match bucket {
        Bucket::Small => 0.6,
        Bucket::Medium => 0.8,
        Bucket::High => 1.0,
    };
    let (mut small, mut medium, mut high) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (rank, (_, v)) in values.iter().take(MIX_WINDOW).enumerate() {
        let bucket = Bucket::of(*v);
        let weight = if rank < MIX_RECENT { 1.0 + extra(bucket) } else { 1.0 };
        match bucket {
            Bucket::Small => small += weight,
            Bucket::Medium => medium += weight,
            Bucket::High => high += weight,
        }
    }
    let total = (small + medium + high).max(1e-6);
    BucketMix {
        small: small / total,
        medium: medium / total,
        high: high / total,
    }
}

/// Loss rate over the last wagered decisions.
fn undercut_rate(history: &[PredictionRecord]) -> f64 {
    let wagered: Vec<&PredictionRecord> = history
        .iter()
        .filter(|r| r.bet > Decimal::ZERO)
        .take(UNDERCUT_WINDOW)
        .collect();
    if wagered.is_empty() {
        return 0.0;
    }
    let losses = wagered.iter().filter(|r| !r.success).count();
    losses as f64 / wagered.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
