//! Shareable high-multiplier signal.
//!
//! Builds a plain-text summary (next 10x ETA, current target, performance,
//! recent 10x+ rounds) and the share links that carry it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SignalConfig;
use crate::strategy::eta::recent_highs;
use crate::types::{HighEta, LedgerState, PredictionRecord};

const RECENT_HIGHS: usize = 5;

/// Everything the message is built from.
#[derive(Debug, Clone, Copy)]
pub struct SignalInput<'a> {
    pub eta: Option<HighEta>,
    pub target: f64,
    pub ledger: &'a LedgerState,
    pub history: &'a [PredictionRecord],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalLinks {
    pub message: String,
    pub whatsapp: String,
    pub telegram: Option<String>,
}

/// Human countdown: `1h 2m 3s`, `4m 5s`, `6s`, or `now` when due.
pub fn fmt_duration(ms: i64) -> String {
    if ms <= 0 {
        return "now".to_string();
    }
    let s = ms / 1000;
    let (h, m, sec) = (s / 3600, (s % 3600) / 60, s % 60);
    if h > 0 {
        format!("{h}h {m}m {sec}s")
    } else if m > 0 {
        format!("{m}m {sec}s")
    } else {
        format!("{sec}s")
    }
}

fn clock(time: DateTime<Utc>) -> String {
    time.format("%H:%M:%S").to_string()
}

pub fn build_message(input: &SignalInput<'_>) -> String {
    let mut lines = vec!["Cashout Oracle: High Multiplier Signal".to_string()];

    match input.eta {
        Some(eta) => {
            lines.push(format!(
                "Next 10x ETA: {} @ {} UTC",
                fmt_duration(eta.remaining_ms(input.now)),
                clock(eta.predicted_at)
            ));
            lines.push(format!(
                "Avg gap: ~{}m | Last 10x: {} UTC",
                (eta.avg_gap_ms as f64 / 60_000.0).round() as i64,
                clock(eta.last_at)
            ));
        }
        None => lines.push("Next 10x ETA: learning... (insufficient data)".to_string()),
    }

    lines.push(format!("Safe cashout now: {:.2}x", input.target));

    let ledger = input.ledger;
    let accuracy = if ledger.wins + ledger.losses > 0 {
        format!("{:.1}%", ledger.accuracy())
    } else {
        "n/a".to_string()
    };
    lines.push(format!(
        "Performance: {accuracy} success | Wins {} / Losses {}",
        ledger.wins, ledger.losses
    ));

    let highs = recent_highs(input.history, RECENT_HIGHS);
    if !highs.is_empty() {
        let listed: Vec<String> = highs
            .iter()
            .map(|r| format!("{:.2}x@{}", r.final_value, clock(r.time)))
            .collect();
        lines.push(format!("Recent 10x+: {}", listed.join(", ")));
    }

    lines.push("Shared via Cashout Oracle".to_string());
    lines.join("\n")
}

/// WhatsApp share link for the first recipient with any digits in it.
/// Without one, the link opens the contact picker.
pub fn whatsapp_url(recipients: &[String], message: &str) -> String {
    let phone = recipients
        .iter()
        .map(|r| r.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .find(|digits| !digits.is_empty())
        .unwrap_or_default();
    format!("https://wa.me/{phone}?text={}", urlencoding::encode(message))
}

pub fn build_links(config: &SignalConfig, input: &SignalInput<'_>) -> SignalLinks {
    let message = build_message(input);
    SignalLinks {
        whatsapp: whatsapp_url(&config.whatsapp_recipients, &message),
        telegram: config
            .telegram_url
            .as_ref()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()),
        message,
    }
}
