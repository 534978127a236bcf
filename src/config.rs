//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! `EngineSettings` is the snapshot the settlement engine reads once per
//! round; it is replaced wholesale through `RoundSettlementEngine::update_settings`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use tracing::warn;

use crate::strategy::predictor::PredictorTuning;
use crate::types::{Mode, StakeStrategy};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub settings: EngineSettings,
    pub feed: FeedConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub signal: SignalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub start_balance: Decimal,
    /// Where the settings + ledger snapshot is kept between runs.
    #[serde(default)]
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Websocket,
    Replay,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub source: FeedKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub replay_path: Option<String>,
    /// Delay between replayed frames.
    #[serde(default)]
    pub replay_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SignalConfig {
    #[serde(default)]
    pub whatsapp_recipients: Vec<String>,
    #[serde(default)]
    pub telegram_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

/// Per-round knobs: sizing policy, gating, and predictor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Stake as a fraction of balance for the fixed strategy (0.02 = 2%).
    pub risk_pct: f64,
    pub mode: Mode,
    pub stake_strategy: StakeStrategy,
    pub auto_tune: bool,
    pub auto_skip: bool,
    /// Confidence below which auto-skip blocks the wager.
    pub auto_skip_threshold: f64,
    /// Session loss cap in percent of the start balance. 0 disables.
    pub loss_cap_pct: f64,
    /// Consecutive wagered losses that trigger a cooldown.
    #[serde(deserialize_with = "lenient_cooldown")]
    pub cooldown_after: u32,
    /// Rounds skipped once a cooldown triggers.
    #[serde(deserialize_with = "lenient_cooldown")]
    pub cooldown_len: u32,
    pub predictor: PredictorTuning,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            risk_pct: 0.02,
            mode: Mode::Normal,
            stake_strategy: StakeStrategy::Fixed,
            auto_tune: true,
            auto_skip: false,
            auto_skip_threshold: 0.55,
            loss_cap_pct: 20.0,
            cooldown_after: DEFAULT_COOLDOWN,
            cooldown_len: DEFAULT_COOLDOWN,
            predictor: PredictorTuning::default(),
        }
    }
}

const DEFAULT_COOLDOWN: u32 = 2;

/// Accept any integer for a cooldown count. Negative or oversized values
/// fall back to the default instead of failing the whole settings payload.
fn lenient_cooldown<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    match u32::try_from(raw) {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(value = raw, "Invalid cooldown count, using default");
            Ok(DEFAULT_COOLDOWN)
        }
    }
}

impl EngineSettings {
    /// Coerce invalid values to safe defaults. Never fails; each
    /// coercion is logged.
    pub fn sanitize(mut self) -> Self {
        if !self.risk_pct.is_finite() || self.risk_pct < 0.0 {
            warn!(risk_pct = self.risk_pct, "Invalid risk_pct, using 0");
            self.risk_pct = 0.0;
        }
        if !self.auto_skip_threshold.is_finite() {
            warn!("Invalid auto_skip_threshold, using default");
            self.auto_skip_threshold = EngineSettings::default().auto_skip_threshold;
        }
        self.auto_skip_threshold = self.auto_skip_threshold.clamp(0.0, 1.0);
        if !self.loss_cap_pct.is_finite() || self.loss_cap_pct < 0.0 {
            warn!(loss_cap_pct = self.loss_cap_pct, "Invalid loss_cap_pct, disabling cap");
            self.loss_cap_pct = 0.0;
        }
        self.predictor = self.predictor.sanitize();
        self
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text. Settings are sanitized.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.settings = config.settings.sanitize();
        if config.engine.start_balance < Decimal::ZERO {
            warn!(start_balance = %config.engine.start_balance, "Negative start balance, using 0");
            config.engine.start_balance = Decimal::ZERO;
        }
        Ok(config)
    }
}
