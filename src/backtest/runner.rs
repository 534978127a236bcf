//! Backtesting.
//!
//! Two views of past performance: a summary over rounds already settled
//! (P/L, hit rate, max drawdown), and an offline simulator that replays a
//! sequence of outcomes through a fresh settlement engine.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineSettings;
use crate::engine::RoundSettlementEngine;
use crate::types::{PredictionRecord, RoundOutcome};

/// Rounds the summary looks back over.
pub const BACKTEST_WINDOW: usize = 300;

// ---------------------------------------------------------------------------
// Summary over recorded rounds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub rounds: usize,
    pub pnl: Decimal,
    pub wagers: usize,
    pub wins: usize,
    pub losses: usize,
    /// Hit rate over wagered rounds, in percent (one decimal).
    pub hit_rate_pct: f64,
    pub max_drawdown: Decimal,
}

/// Summarize the last `BACKTEST_WINDOW` records (newest first).
/// Returns `None` when nothing has been recorded yet.
pub fn summarize(records: &[PredictionRecord]) -> Option<BacktestSummary> {
    if records.is_empty() {
        return None;
    }
    let window = &records[..records.len().min(BACKTEST_WINDOW)];

    let mut equity = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;
    let (mut wins, mut losses) = (0usize, 0usize);

    for record in window.iter().rev() {
        equity += record_delta(record);
        if record.is_wagered() {
            if record.success {
                wins += 1;
            } else {
                losses += 1;
            }
        }
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(peak - equity);
    }

    let wagers = wins + losses;
    let hit_rate_pct = if wagers > 0 {
        (wins as f64 / wagers as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    Some(BacktestSummary {
        rounds: window.len(),
        pnl: equity,
        wagers,
        wins,
        losses,
        hit_rate_pct,
        max_drawdown,
    })
}

/// P/L a record contributed to the bankroll.
fn record_delta(record: &PredictionRecord) -> Decimal {
    if !record.is_wagered() {
        return Decimal::ZERO;
    }
    if record.success {
        let target = Decimal::from_f64(record.suggested)
            .unwrap_or(Decimal::ONE)
            .round_dp(2);
        (record.bet * (target - Decimal::ONE)).round_dp(2)
    } else {
        -record.bet
    }
}

// ---------------------------------------------------------------------------
// Replay simulator
// ---------------------------------------------------------------------------

/// Full report of a simulated run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_pnl: Decimal,
    pub return_pct: f64,
    pub rounds: usize,
    /// Outcomes the engine refused (malformed, duplicate or stale).
    pub rejected: usize,
    pub wagers: usize,
    pub wins: usize,
    pub losses: usize,
    pub hit_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub peak_balance: Decimal,
    /// Balance after each settled round, for charting.
    pub balance_history: Vec<(DateTime<Utc>, Decimal)>,
}

pub struct Simulator {
    settings: EngineSettings,
}

impl Simulator {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// Replay `outcomes` (oldest first) from `initial_balance`.
    pub fn run(&self, outcomes: &[RoundOutcome], initial_balance: Decimal) -> SimulationReport {
        let mut engine = RoundSettlementEngine::new(self.settings.clone(), initial_balance);
        let initial_balance = engine.ledger().balance;

        let mut balance_history = Vec::with_capacity(outcomes.len() + 1);
        balance_history.push((outcomes.first().map(|o| o.time).unwrap_or_else(Utc::now), initial_balance));
        let mut returns: Vec<f64> = Vec::new();
        let mut peak = initial_balance;
        let mut max_dd = 0.0_f64;
        let mut max_dd_amount = Decimal::ZERO;
        let (mut rounds, mut rejected, mut wins, mut losses) = (0usize, 0usize, 0usize, 0usize);

        for outcome in outcomes {
            let out = match engine.process_outcome(*outcome) {
                Ok(out) => out,
                Err(e) => {
                    debug!(error = %e, "Simulated outcome rejected");
                    rejected += 1;
                    continue;
                }
            };
            rounds += 1;

            if out.bet > Decimal::ZERO {
                if out.success {
                    wins += 1;
                } else {
                    losses += 1;
                }
                // Per-wager return, f64 for the variance maths.
                let pnl = out.delta.to_f64().unwrap_or(0.0);
                let stake = out.bet.to_f64().unwrap_or(1.0).max(0.01);
                returns.push(pnl / stake);
            }

            peak = peak.max(out.balance);
            let drawdown = peak - out.balance;
            if drawdown > max_dd_amount {
                max_dd_amount = drawdown;
            }
            if peak > Decimal::ZERO {
                let dd = (drawdown / peak).to_f64().unwrap_or(0.0);
                max_dd = max_dd.max(dd);
            }

            balance_history.push((outcome.time, out.balance));
        }

        let final_balance = engine.ledger().balance;
        let wagers = wins + losses;
        let return_pct = if initial_balance > Decimal::ZERO {
            ((final_balance - initial_balance) / initial_balance * dec!(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let report = SimulationReport {
            initial_balance,
            final_balance,
            total_pnl: final_balance - initial_balance,
            return_pct,
            rounds,
            rejected,
            wagers,
            wins,
            losses,
            hit_rate: if wagers > 0 { wins as f64 / wagers as f64 } else { 0.0 },
            sharpe_ratio: compute_sharpe(&returns),
            max_drawdown: max_dd_amount,
            max_drawdown_pct: max_dd * 100.0,
            peak_balance: peak,
            balance_history,
        };

        info!(
            rounds = report.rounds,
            wagers = report.wagers,
            final_balance = format!("{:.2}", report.final_balance),
            return_pct = format!("{:.1}%", report.return_pct),
            sharpe = format!("{:.2}", report.sharpe_ratio),
            "Simulation complete"
        );

        report
    }
}

/// Sharpe ratio of per-wager returns (not annualized; rounds have no
/// calendar rhythm).
fn compute_sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return 0.0;
    }

    mean / std_dev
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_record(bet: Decimal, success: bool, suggested: f64) -> PredictionRecord {
        PredictionRecord {
            final_value: 1.5,
            suggested,
            bet,
            success,
            time: Utc::now(),
        }
    }

    fn plain_settings() -> EngineSettings {
        EngineSettings {
            auto_tune: false,
            auto_skip: false,
            ..EngineSettings::default()
        }
    }

    fn outcomes(values: &[f64]) -> Vec<RoundOutcome> {
        let base = Utc::now() - Duration::hours(1);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RoundOutcome::new(*v, base + Duration::seconds(i as i64 * 30)))
            .collect()
    }

    #[test]
    fn test_summary_empty() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summary_pnl_hit_rate_drawdown() {
        // Newest first: a win of +5 after a loss of -10 and a skipped round.
        let records = vec![
            make_record(dec!(10), true, 1.5),
            make_record(dec!(10), false, 1.5),
            make_record(Decimal::ZERO, false, 1.5),
        ];
        let summary = summarize(&records).unwrap();
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.pnl, dec!(-5));
        assert_eq!(summary.wagers, 2);
        assert_eq!(summary.hit_rate_pct, 50.0);
        assert_eq!(summary.max_drawdown, dec!(10));
    }

    #[test]
    fn test_summary_window_capped() {
        let records: Vec<_> = (0..400).map(|_| make_record(dec!(1), true, 1.2)).collect();
        let summary = summarize(&records).unwrap();
        assert_eq!(summary.rounds, BACKTEST_WINDOW);
        assert_eq!(summary.pnl, dec!(60));
        assert_eq!(summary.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_simulation_all_high_is_profitable() {
        let sim = Simulator::new(plain_settings());
        let report = sim.run(&outcomes(&[10.5; 10]), dec!(1000));
        assert!(report.final_balance > dec!(1000), "balance {}", report.final_balance);
        assert_eq!(report.losses, 0);
        assert_eq!(report.wins, 10);
        assert_eq!(report.rounds, 10);
        assert_eq!(report.max_drawdown, Decimal::ZERO);
        assert!(report.return_pct > 0.0);
        assert_eq!(report.balance_history.len(), 11);
    }

    #[test]
    fn test_simulation_losing_run_hits_cooldown() {
        let sim = Simulator::new(plain_settings());
        let report = sim.run(&outcomes(&[1.03; 6]), dec!(1000));
        assert!(report.final_balance < dec!(1000));
        // Two losses trigger a two-round cooldown, so not every round wagers.
        assert!(report.wagers < 6);
        assert!(report.max_drawdown > Decimal::ZERO);
        assert!(report.max_drawdown_pct > 0.0);
    }

    #[test]
    fn test_simulation_counts_rejections() {
        let sim = Simulator::new(plain_settings());
        let mut rounds = outcomes(&[1.5, 2.0]);
        rounds.push(RoundOutcome::new(f64::NAN, Utc::now()));
        rounds.push(rounds[0]);
        let report = sim.run(&rounds, dec!(100));
        assert_eq!(report.rounds, 2);
        assert_eq!(report.rejected, 2);
    }

    #[test]
    fn test_simulation_empty() {
        let sim = Simulator::new(EngineSettings::default());
        let report = sim.run(&[], dec!(100));
        assert_eq!(report.rounds, 0);
        assert_eq!(report.final_balance, dec!(100));
        assert_eq!(report.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_sharpe() {
        assert_eq!(compute_sharpe(&[0.5]), 0.0);
        assert_eq!(compute_sharpe(&[0.2, 0.2, 0.2]), 0.0);
        assert!(compute_sharpe(&[0.2, -1.0, 0.3, 0.25]) < 0.0);
        assert!(compute_sharpe(&[0.2, 0.3, 0.25, -0.1]) > 0.0);
    }
}
