//! Simulation harness.
//!
//! Replays generated crash rounds through the full settlement pipeline
//! and checks the bankroll and target bounds hold for every mode and
//! stake strategy.

use cashout_oracle::backtest::Simulator;
use cashout_oracle::config::EngineSettings;
use cashout_oracle::engine::RoundSettlementEngine;
use cashout_oracle::types::{Mode, RoundOutcome, StakeStrategy};
use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Crash-style outcomes: 1 / (1 - u) with a 3% house edge, floored at 1.
pub fn generate_rounds(seed: u64, count: usize) -> Vec<RoundOutcome> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let u: f64 = rng.gen_range(0.0..0.999);
            let value = ((0.97 / (1.0 - u)).max(1.0) * 100.0).round() / 100.0;
            RoundOutcome::new(value, start + Duration::seconds(i as i64 * 25)).with_seq(i as u64 + 1)
        })
        .collect()
}

fn settings(mode: Mode, strategy: StakeStrategy) -> EngineSettings {
    EngineSettings {
        mode,
        stake_strategy: strategy,
        ..EngineSettings::default()
    }
}

#[test]
fn test_bounds_hold_for_every_mode_and_strategy() {
    let rounds = generate_rounds(42, 400);
    for mode in Mode::ALL {
        for strategy in [StakeStrategy::Fixed, StakeStrategy::Kelly, StakeStrategy::Recovery] {
            let mut engine = RoundSettlementEngine::new(settings(*mode, strategy), dec!(1000));
            let mut previous = engine.current_target();
            for outcome in &rounds {
                let balance_before = engine.ledger().balance;
                let out = engine.process_outcome(*outcome).unwrap();
                assert!(out.balance >= Decimal::ZERO);
                assert!(out.bet <= balance_before, "stake {} above balance {}", out.bet, balance_before);
                assert!(
                    (1.02..=2.0).contains(&out.suggested),
                    "{mode}/{strategy}: target {} out of bounds",
                    out.suggested
                );
                assert!(
                    (out.suggested - previous).abs() <= 0.15 + 1e-9,
                    "{mode}/{strategy}: step {} -> {}",
                    previous,
                    out.suggested
                );
                assert!((0.0..=1.0).contains(&out.confidence));
                previous = out.suggested;
            }
            assert_eq!(engine.history().len(), 50);
        }
    }
}

#[test]
fn test_cooldown_blocks_following_rounds() {
    let rounds = generate_rounds(7, 300);
    let mut engine = RoundSettlementEngine::new(settings(Mode::Normal, StakeStrategy::Fixed), dec!(1000));
    let mut cooldown_before = 0;
    for outcome in &rounds {
        let out = engine.process_outcome(*outcome).unwrap();
        if cooldown_before > 0 {
            assert_eq!(out.bet, Decimal::ZERO, "wager placed during cooldown");
        }
        cooldown_before = out.cooldown_rounds_remaining;
    }
}

#[test]
fn test_simulator_matches_engine() {
    let rounds = generate_rounds(99, 250);
    let settings = settings(Mode::Aggressive, StakeStrategy::Kelly);

    let report = Simulator::new(settings.clone()).run(&rounds, dec!(500));

    let mut engine = RoundSettlementEngine::new(settings, dec!(500));
    for outcome in &rounds {
        engine.process_outcome(*outcome).unwrap();
    }

    assert_eq!(report.rounds, rounds.len());
    assert_eq!(report.rejected, 0);
    assert_eq!(report.final_balance, engine.ledger().balance);
    assert_eq!(report.balance_history.len(), rounds.len() + 1);
    assert!(report.peak_balance >= report.initial_balance);
    assert!(report.max_drawdown_pct >= 0.0 && report.max_drawdown_pct <= 100.0);
}

#[test]
fn test_simulation_is_deterministic() {
    let rounds = generate_rounds(5, 200);
    let sim = Simulator::new(settings(Mode::Safe, StakeStrategy::Recovery));
    let a = sim.run(&rounds, dec!(1000));
    let b = sim.run(&rounds, dec!(1000));
    assert_eq!(a.final_balance, b.final_balance);
    assert_eq!(a.wagers, b.wagers);
    assert_eq!(a.sharpe_ratio, b.sharpe_ratio);
}

#[test]
fn test_replayed_duplicates_are_not_settled_twice() {
    let rounds = generate_rounds(11, 60);
    let mut replayed = rounds.clone();
    // A reconnect resends the last ten rounds.
    replayed.extend_from_slice(&rounds[50..]);

    let clean = Simulator::new(EngineSettings::default()).run(&rounds, dec!(1000));
    let noisy = Simulator::new(EngineSettings::default()).run(&replayed, dec!(1000));
    assert_eq!(noisy.rejected, 10);
    assert_eq!(noisy.final_balance, clean.final_balance);
}

#[test]
fn test_daily_baseline_rolls_over_midnight() {
    // Rounds start at 23:00 UTC and run past midnight.
    let rounds = generate_rounds(3, 200);
    let mut engine = RoundSettlementEngine::new(EngineSettings::default(), dec!(1000));
    let mut balance_at_midnight = None;
    for outcome in &rounds {
        let before = engine.ledger().balance;
        engine.process_outcome(*outcome).unwrap();
        if balance_at_midnight.is_none() && outcome.time.date_naive() != rounds[0].time.date_naive() {
            balance_at_midnight = Some(before);
        }
    }
    let baseline = engine.daily_baseline();
    assert_eq!(baseline.date, rounds.last().unwrap().time.date_naive());
    assert_eq!(Some(baseline.balance), balance_at_midnight);
    assert_eq!(engine.daily_pl(), engine.ledger().balance - baseline.balance);
}
