//! Feed replay: raw frames through the pump, checked against a direct
//! simulation of the same outcomes.

use std::time::Duration;

use cashout_oracle::backtest::Simulator;
use cashout_oracle::config::{EngineSettings, SignalConfig};
use cashout_oracle::dashboard::routes::DashboardState;
use cashout_oracle::engine::RoundSettlementEngine;
use cashout_oracle::feed::{pump, replay::ReplayFeed};
use cashout_oracle::types::{Mode, RoundOutcome};
use chrono::Utc;
use rust_decimal_macros::dec;

use crate::simulation::generate_rounds;

/// Render outcomes as socket frames, with an interim tick before each final
/// and some noise the decoder must drop.
fn render_frames(rounds: &[RoundOutcome]) -> String {
    let mut text = String::from("0{\"sid\":\"abc\"}\n40\n");
    for (i, round) in rounds.iter().enumerate() {
        text.push_str(&format!("4,{:.2}\n", 1.0 + (round.value - 1.0) / 2.0));
        if i % 2 == 0 {
            text.push_str(&format!("42[\"5\",\"r{i}\",\"crash\",\"{:.2}\"]\n", round.value));
        } else {
            text.push_str(&format!(")]}}',5,r{i},crash,{:.2}\n", round.value));
        }
        text.push_str("2\n");
    }
    text
}

#[tokio::test]
async fn test_replayed_frames_match_simulation() {
    let rounds = generate_rounds(21, 120);
    let settings = EngineSettings {
        mode: Mode::Safe,
        ..EngineSettings::default()
    };

    let frames = render_frames(&rounds);
    let mut feed = ReplayFeed::new(frames.as_bytes(), Duration::ZERO);
    let mut engine = RoundSettlementEngine::new(settings.clone(), dec!(1000));
    let dashboard = DashboardState::new(&engine, SignalConfig::default());

    let stats = pump(&mut feed, &mut engine, Some(&dashboard)).await.unwrap();
    assert_eq!(stats.settled, 120);
    assert_eq!(stats.interims, 120);
    assert_eq!(stats.rejected, 0);
    // Handshake frames plus one ping per round.
    assert_eq!(stats.dropped, 2 + 120);

    let report = Simulator::new(settings).run(&rounds, dec!(1000));
    assert_eq!(engine.ledger().balance, report.final_balance);
    assert_eq!(engine.ledger().wins + engine.ledger().losses, {
        let non_neutral = rounds.iter().filter(|r| !r.is_neutral()).count();
        non_neutral as u64
    });

    let view = dashboard.view.read().await;
    assert_eq!(view.ledger.balance, report.final_balance);
    assert_eq!(view.history.len(), 50);
    assert!(view.backtest.is_some());
    assert!(view.updated_at <= Utc::now());
}

#[tokio::test]
async fn test_settings_queued_mid_feed_apply_to_later_rounds() {
    let rounds = generate_rounds(8, 30);
    let mut engine = RoundSettlementEngine::new(EngineSettings::default(), dec!(1000));
    let dashboard = DashboardState::new(&engine, SignalConfig::default());

    let first = render_frames(&rounds[..15]);
    let mut feed = ReplayFeed::new(first.as_bytes(), Duration::ZERO);
    pump(&mut feed, &mut engine, Some(&dashboard)).await.unwrap();
    assert_eq!(engine.settings().risk_pct, 0.02);

    dashboard
        .queue_settings(EngineSettings {
            risk_pct: 0.0,
            auto_tune: false,
            ..EngineSettings::default()
        })
        .await;
    let balance = engine.ledger().balance;

    let rest = render_frames(&rounds[15..]);
    let mut feed = ReplayFeed::new(rest.as_bytes(), Duration::ZERO);
    pump(&mut feed, &mut engine, Some(&dashboard)).await.unwrap();

    assert_eq!(engine.settings().risk_pct, 0.0);
    assert_eq!(engine.history().len(), 30);
    // Zero risk means nothing is wagered after the update.
    assert_eq!(engine.ledger().balance, balance);
}
