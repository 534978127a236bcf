//! Next high-multiplier ETA.
//!
//! Estimates when the next ≥10x round will land from the spacing of past
//! ones: an EWMA over recent inter-arrival gaps, clamped to a sane window.

use chrono::{DateTime, Duration, Utc};

use crate::types::{HighEta, PredictionRecord};

/// Minimum multiplier that counts as a high event.
pub const HIGH_THRESHOLD: f64 = 10.0;

/// Gaps this long are treated as feed outages rather than signal.
const MAX_SIGNAL_GAP_MS: i64 = 6 * 60 * 60 * 1000;
const MAX_GAPS: usize = 12;
const EWMA_ALPHA: f64 = 0.35;
const MIN_GAP_MS: f64 = 3.0 * 60.0 * 1000.0;
const MAX_GAP_MS: f64 = 120.0 * 60.0 * 1000.0;

/// Estimate the next high event from `history` (any order).
///
/// Returns `None` with fewer than two high events or no usable gaps.
pub fn estimate(history: &[PredictionRecord]) -> Option<HighEta> {
    let mut times: Vec<DateTime<Utc>> = history
        .iter()
        .filter(|r| r.final_value >= HIGH_THRESHOLD)
        .map(|r| r.time)
        .collect();
    if times.len() < 2 {
        return None;
    }
    times.sort();

    let gaps: Vec<i64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds())
        .filter(|d| *d > 0 && *d < MAX_SIGNAL_GAP_MS)
        .collect();
    let recent = &gaps[gaps.len().saturating_sub(MAX_GAPS)..];
    let (first, rest) = recent.split_first()?;

    let ewma = rest
        .iter()
        .fold(*first as f64, |acc, gap| EWMA_ALPHA * *gap as f64 + (1.0 - EWMA_ALPHA) * acc);
    let avg_gap_ms = ewma.clamp(MIN_GAP_MS, MAX_GAP_MS).round() as i64;

    let last_at = *times.last()?;
    Some(HighEta {
        predicted_at: last_at + Duration::milliseconds(avg_gap_ms),
        avg_gap_ms,
        last_at,
    })
}

/// The most recent high events, newest first.
pub fn recent_highs(history: &[PredictionRecord], limit: usize) -> Vec<&PredictionRecord> {
    let mut highs: Vec<&PredictionRecord> = history
        .iter()
        .filter(|r| r.final_value >= HIGH_THRESHOLD)
        .collect();
    highs.sort_by(|a, b| b.time.cmp(&a.time));
    highs.truncate(limit);
    highs
}
