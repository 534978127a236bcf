//! Feed adapter.
//!
//! Decodes raw game-server frames into round events and pumps them into
//! the settlement engine. Interim multipliers only update the live display;
//! finals trigger exactly one settlement each. Frames that cannot be
//! decoded are dropped without touching any state.

pub mod replay;
pub mod websocket;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dashboard::routes::{ControlRequest, DashboardState};
use crate::engine::RoundSettlementEngine;
use crate::types::RoundOutcome;

/// Anti-XSSI prefix some servers put in front of every frame.
const XSSI_PREFIX: &str = ")]}',";

/// Packet type of a round final.
const FINAL_PACKET: &str = "5";
/// Packet type of an in-flight multiplier.
const INTERIM_PACKET: &str = "4";

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// A decoded feed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedEvent {
    /// A round ended at `value`. Recorded replay lines may carry the
    /// sequence number and timestamp; socket frames leave them to the receiver.
    Final {
        value: f64,
        seq: Option<u64>,
        time: Option<DateTime<Utc>>,
    },
    /// In-flight multiplier of the running round.
    Interim(f64),
}

/// A recorded outcome line, as written by replay tooling.
#[derive(Debug, Deserialize)]
struct RecordedFrame {
    value: f64,
    #[serde(default)]
    seq: Option<u64>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    time: Option<DateTime<Utc>>,
}

/// Decode one socket frame. Returns `None` for anything that is not a
/// round final or an interim value.
pub fn parse_frame(raw: &str) -> Option<FeedEvent> {
    let mut msg = raw.trim();
    if let Some(rest) = msg.strip_prefix(XSSI_PREFIX) {
        msg = rest.trim();
    }
    // Socket.IO style packet id in front of the payload array.
    let digits = msg.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 && msg[digits..].starts_with('[') {
        msg = &msg[digits..];
    }

    let tokens = tokenize(msg);
    match tokens.first().map(String::as_str) {
        Some(FINAL_PACKET) => final_value(&tokens).map(|value| FeedEvent::Final {
            value,
            seq: None,
            time: None,
        }),
        Some(INTERIM_PACKET) => tokens
            .get(1)
            .filter(|t| !t.is_empty())
            .and_then(|t| lenient_number(t))
            .map(FeedEvent::Interim),
        _ => None,
    }
}

/// Decode one replay line: a recorded outcome object, or else a socket frame.
pub fn parse_replay_line(raw: &str) -> Option<FeedEvent> {
    let line = raw.trim();
    if line.starts_with('{') {
        let frame: RecordedFrame = serde_json::from_str(line).ok()?;
        return Some(FeedEvent::Final {
            value: frame.value,
            seq: frame.seq,
            time: frame.time,
        });
    }
    parse_frame(line)
}

/// Split a payload into string tokens: JSON array elements when it parses
/// as one, otherwise a quote-aware comma split.
fn tokenize(msg: &str) -> Vec<String> {
    if msg.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(msg) {
            let tokens: Vec<String> = items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect();
            if !tokens.is_empty() {
                return tokens;
            }
        }
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut prev: Option<char> = None;
    for ch in msg.chars() {
        if ch == '"' && prev != Some('\\') {
            quoted = !quoted;
        } else if ch == ',' && !quoted {
            tokens.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
        prev = Some(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Terminal multiplier of a final frame: token 3 when it holds a number
/// ≥ 1, otherwise the first token after the packet type that does.
fn final_value(tokens: &[String]) -> Option<f64> {
    let at_least_one = |t: &String| lenient_number(t).filter(|v| *v >= 1.0);
    tokens
        .get(3)
        .and_then(at_least_one)
        .or_else(|| tokens.iter().skip(1).find_map(at_least_one))
}

/// Parse the longest numeric prefix of `token` (`"2.35x"` → 2.35).
pub fn lenient_number(token: &str) -> Option<f64> {
    let s = token.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().ok()
}

// ---------------------------------------------------------------------------
// Feed sources
// ---------------------------------------------------------------------------

/// A source of raw frames. `Ok(None)` means the feed has ended.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedSource: Send {
    async fn next_frame(&mut self) -> Result<Option<String>>;

    /// Decode a frame produced by this source. Live sources accept socket
    /// frames only.
    fn decode(&self, raw: &str) -> Option<FeedEvent> {
        parse_frame(raw)
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub frames: u64,
    pub finals: u64,
    pub settled: u64,
    pub interims: u64,
    /// Frames that did not decode.
    pub dropped: u64,
    /// Finals the engine refused (malformed, duplicate or stale).
    pub rejected: u64,
}

/// Drive `engine` from `feed` until the feed ends or fails.
///
/// Requests queued on the dashboard (settings replacement, resets) are
/// applied just before each settlement, never during one.
pub async fn pump<F>(
    feed: &mut F,
    engine: &mut RoundSettlementEngine,
    dashboard: Option<&DashboardState>,
) -> Result<PumpStats>
where
    F: FeedSource + ?Sized,
{
    let mut stats = PumpStats::default();

    while let Some(raw) = feed.next_frame().await? {
        stats.frames += 1;
        match feed.decode(&raw) {
            None => {
                stats.dropped += 1;
                debug!(frame = %raw.chars().take(80).collect::<String>(), "Frame dropped");
            }
            Some(FeedEvent::Interim(value)) => {
                stats.interims += 1;
                if let Some(dashboard) = dashboard {
                    dashboard.set_live(value).await;
                }
            }
            Some(FeedEvent::Final { value, seq, time }) => {
                stats.finals += 1;
                if let Some(dashboard) = dashboard {
                    for request in dashboard.take_pending().await {
                        apply(engine, request);
                    }
                }

                let outcome = RoundOutcome {
                    value,
                    time: time.unwrap_or_else(Utc::now),
                    seq,
                };
                match engine.process_outcome(outcome) {
                    Ok(_) => stats.settled += 1,
                    Err(e) => {
                        stats.rejected += 1;
                        debug!(error = %e, "Outcome rejected");
                    }
                }
                if let Some(dashboard) = dashboard {
                    dashboard.publish(engine).await;
                }
            }
        }
    }

    info!(
        frames = stats.frames,
        settled = stats.settled,
        dropped = stats.dropped,
        rejected = stats.rejected,
        "Feed ended"
    );
    Ok(stats)
}

fn apply(engine: &mut RoundSettlementEngine, request: ControlRequest) {
    match request {
        ControlRequest::ReplaceSettings(settings) => engine.update_settings(settings),
        ControlRequest::ResetBalance => engine.reset_balance(),
        ControlRequest::ResetDailyBaseline => engine.reset_daily_baseline(Utc::now()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, SignalConfig};
    use crate::feed::replay::ReplayFeed;
    use crate::types::Mode;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn final_of(raw: &str) -> Option<f64> {
        match parse_frame(raw) {
            Some(FeedEvent::Final { value, .. }) => Some(value),
            _ => None,
        }
    }

    fn scripted(frames: Vec<&str>) -> MockFeedSource {
        let mut frames = frames
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter();
        let mut feed = MockFeedSource::new();
        feed.expect_next_frame().returning(move || Ok(frames.next()));
        feed.expect_decode().returning(parse_frame);
        feed
    }

    fn make_engine() -> RoundSettlementEngine {
        RoundSettlementEngine::new(
            EngineSettings {
                auto_tune: false,
                ..EngineSettings::default()
            },
            dec!(1000),
        )
    }

    // ---- decoding ----------------------------------------------------------

    #[test]
    fn test_parse_comma_final_uses_token_three() {
        assert_eq!(final_of("5,123,abc,2.35"), Some(2.35));
    }

    #[test]
    fn test_parse_json_array_with_packet_id() {
        assert_eq!(final_of(r#"42["5","r-9","x","1.87"]"#), Some(1.87));
        assert_eq!(final_of(r#")]}', 42[5, 7, "x", 3.1]"#), Some(3.1));
    }

    #[test]
    fn test_parse_final_falls_back_to_first_number() {
        // Token 3 is below 1, so the first token ≥ 1 wins.
        assert_eq!(final_of("5,0.5,4.2,0.9"), Some(4.2));
        assert_eq!(final_of("5,abc"), None);
    }

    #[test]
    fn test_parse_interim() {
        assert_eq!(parse_frame("4,1.57"), Some(FeedEvent::Interim(1.57)));
        assert_eq!(parse_frame(r#"["4","2.01x"]"#), Some(FeedEvent::Interim(2.01)));
        assert_eq!(parse_frame("4,"), None);
        assert_eq!(parse_frame("4,abc"), None);
    }

    #[test]
    fn test_parse_quoted_commas() {
        assert_eq!(final_of(r#"5,"a,b",x,1.4"#), Some(1.4));
    }

    #[test]
    fn test_parse_unknown_packets_dropped() {
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("2"), None);
        assert_eq!(parse_frame("3,ping"), None);
        assert_eq!(parse_frame("[]"), None);
    }

    #[test]
    fn test_parse_recorded_outcome() {
        let event =
            parse_replay_line(r#"  {"value": 2.5, "seq": 11, "time": 1700000000000}"#).unwrap();
        match event {
            FeedEvent::Final { value, seq, time } => {
                assert_eq!(value, 2.5);
                assert_eq!(seq, Some(11));
                assert_eq!(time.unwrap().timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(parse_replay_line(r#"{"seq": 1}"#), None);
        assert_eq!(parse_replay_line("5,1,x,1.50").map(|_| ()), Some(()));
    }

    #[test]
    fn test_socket_frames_reject_outcome_objects() {
        assert_eq!(parse_frame(r#"{"value": 2.5}"#), None);
        assert_eq!(parse_frame(r#"{"value": 2.5, "seq": 99, "time": 1700000000000}"#), None);
        assert_eq!(parse_frame(r#"42{"value": 2.5}"#), None);
    }

    #[test]
    fn test_lenient_number() {
        assert_eq!(lenient_number("2.35x"), Some(2.35));
        assert_eq!(lenient_number("  7"), Some(7.0));
        assert_eq!(lenient_number(".5"), Some(0.5));
        assert_eq!(lenient_number("1e2z"), Some(100.0));
        assert_eq!(lenient_number("3e"), Some(3.0));
        assert_eq!(lenient_number("-1.5"), Some(-1.5));
        assert_eq!(lenient_number("x1"), None);
        assert_eq!(lenient_number("."), None);
        assert_eq!(lenient_number(""), None);
    }

    // ---- pump --------------------------------------------------------------

    #[tokio::test]
    async fn test_pump_settles_finals_only() {
        let mut feed = scripted(vec!["4,1.10", "4,1.45", "5,1,x,1.50", "garbage", "5,2,x,3.00"]);
        let mut engine = make_engine();
        let stats = pump(&mut feed, &mut engine, None).await.unwrap();

        assert_eq!(stats.frames, 5);
        assert_eq!(stats.interims, 2);
        assert_eq!(stats.finals, 2);
        assert_eq!(stats.settled, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(engine.history().len(), 2);
    }

    #[tokio::test]
    async fn test_live_pump_drops_outcome_objects() {
        let mut feed = scripted(vec![r#"{"value": 2.5, "seq": 7}"#, "5,1,x,1.50"]);
        let mut engine = make_engine();
        let stats = pump(&mut feed, &mut engine, None).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.settled, 1);
        assert_eq!(engine.history().newest().unwrap().final_value, 1.5);
    }

    #[tokio::test]
    async fn test_pump_rejects_replayed_sequence() {
        let lines = concat!(
            "{\"value\": 1.5, \"seq\": 1, \"time\": 1700000000000}\n",
            "{\"value\": 2.5, \"seq\": 2, \"time\": 1700000030000}\n",
            "{\"value\": 2.5, \"seq\": 2, \"time\": 1700000030000}\n",
            "{\"value\": 1.8, \"seq\": 3, \"time\": 1700000010000}\n",
        );
        let mut feed = ReplayFeed::new(lines.as_bytes(), Duration::ZERO);
        let mut engine = make_engine();
        let stats = pump(&mut feed, &mut engine, None).await.unwrap();
        assert_eq!(stats.settled, 2);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn test_pump_propagates_feed_error() {
        let mut feed = MockFeedSource::new();
        feed.expect_next_frame()
            .returning(|| Err(anyhow::anyhow!("connection reset")));
        let mut engine = make_engine();
        assert!(pump(&mut feed, &mut engine, None).await.is_err());
    }

    #[tokio::test]
    async fn test_pump_updates_dashboard_and_applies_settings() {
        let mut engine = make_engine();
        let dashboard = DashboardState::new(&engine, SignalConfig::default());
        dashboard
            .queue_settings(EngineSettings {
                mode: Mode::Safe,
                ..engine.settings().clone()
            })
            .await;

        let mut feed = scripted(vec!["4,1.33", "5,1,x,2.00"]);
        pump(&mut feed, &mut engine, Some(&dashboard)).await.unwrap();

        assert_eq!(engine.settings().mode, Mode::Safe);
        assert!(dashboard.take_pending().await.is_empty());
        let view = dashboard.view.read().await;
        assert_eq!(view.history.len(), 1);
        assert!(view.latest.is_some());
        assert_eq!(*dashboard.live.read().await, None);
    }

    #[tokio::test]
    async fn test_pump_applies_reset_before_next_round() {
        let mut engine = make_engine();
        engine
            .process_outcome(RoundOutcome::new(1.03, Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        assert_eq!(engine.ledger().balance, dec!(980));

        let dashboard = DashboardState::new(&engine, SignalConfig::default());
        dashboard.queue(ControlRequest::ResetBalance).await;

        // A neutral round places no wager, so only the reset moves the balance.
        let mut feed = scripted(vec!["5,1,x,1.01"]);
        pump(&mut feed, &mut engine, Some(&dashboard)).await.unwrap();
        assert_eq!(engine.ledger().balance, dec!(1000));
        assert_eq!(dashboard.view.read().await.ledger.balance, dec!(1000));
    }
}
