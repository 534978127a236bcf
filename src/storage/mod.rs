//! Persistence layer.
//!
//! Saves and loads the engine snapshot (settings, ledger and daily
//! baseline) to/from a JSON file. Round history is not persisted; it is
//! rebuilt from the feed after a restart.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::{debug, info};

use crate::engine::EngineSnapshot;
use crate::types::OracleError;

/// Default snapshot file path.
const DEFAULT_STATE_FILE: &str = "cashout_state.json";

/// Save the engine snapshot to a JSON file.
pub fn save_snapshot(snapshot: &EngineSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialise engine snapshot")?;

    std::fs::write(path, &json).context(format!("Failed to write snapshot to {path}"))?;

    debug!(path, balance = %snapshot.ledger.balance, "Snapshot saved");
    Ok(())
}

/// Load the engine snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: Option<&str>) -> Result<Option<EngineSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: EngineSnapshot =
        serde_json::from_str(&json).context(format!("Failed to parse snapshot from {path}"))?;

    if snapshot.ledger.start_balance < Decimal::ZERO {
        return Err(OracleError::Storage(format!(
            "snapshot {path} has a negative start balance ({})",
            snapshot.ledger.start_balance
        ))
        .into());
    }

    info!(
        path,
        balance = %snapshot.ledger.balance,
        wins = snapshot.ledger.wins,
        losses = snapshot.ledger.losses,
        mode = %snapshot.settings.mode,
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
