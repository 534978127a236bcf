//! CASHOUT ORACLE: crash-round safe cashout predictor
//!
//! Entry point. Initialises structured logging, loads configuration,
//! restores the engine snapshot from disk (or starts fresh), and pumps
//! the round feed through the settlement engine until the feed ends or
//! Ctrl+C is pressed. The snapshot is saved on the way out.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use cashout_oracle::config::{self, FeedConfig, FeedKind};
use cashout_oracle::dashboard::{self, routes::DashboardState};
use cashout_oracle::engine::RoundSettlementEngine;
use cashout_oracle::feed::{self, replay::ReplayFeed, websocket::WebSocketFeed, FeedSource};
use cashout_oracle::storage;

const BANNER: &str = r#"
  ____           _                 _
 / ___|__ _ ___| |__   ___  _   _| |_
| |   / _` / __| '_ \ / _ \| | | | __|
| |__| (_| \__ \ | | | (_) | |_| | |_
 \____\__,_|___/_| |_|\___/ \__,_|\__|

  Cashout Oracle v0.1.0 | safe cashout predictor
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Initialise structured logging (before config load)
    init_logging();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    println!("{BANNER}");
    info!(
        start_balance = %cfg.engine.start_balance,
        mode = %cfg.settings.mode,
        strategy = %cfg.settings.stake_strategy,
        feed = ?cfg.feed.source,
        "Cashout Oracle starting up"
    );

    // -- Restore or create the engine ------------------------------------

    let state_file = cfg.engine.state_file.as_deref();
    let mut engine = match storage::load_snapshot(state_file)? {
        Some(snapshot) => {
            info!(
                balance = %snapshot.ledger.balance,
                wins = snapshot.ledger.wins,
                losses = snapshot.ledger.losses,
                "Resumed from saved snapshot"
            );
            RoundSettlementEngine::restore(snapshot)
        }
        None => {
            info!(balance = %cfg.engine.start_balance, "Fresh start");
            RoundSettlementEngine::new(cfg.settings.clone(), cfg.engine.start_balance)
        }
    };

    // -- Dashboard -------------------------------------------------------

    let dashboard_state = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(&engine, cfg.signal.clone()));
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port).await?;
        Some(state)
    } else {
        None
    };

    // -- Main loop -------------------------------------------------------

    let mut source = open_feed(&cfg.feed).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    tokio::select! {
        result = feed::pump(source.as_mut(), &mut engine, dashboard_state.as_deref()) => {
            match result {
                Ok(stats) => info!(
                    settled = stats.settled,
                    dropped = stats.dropped,
                    rejected = stats.rejected,
                    "Feed finished"
                ),
                Err(e) => error!(error = %e, "Feed failed"),
            }
        }
        _ = &mut shutdown => {
            info!("Shutdown signal received");
        }
    }

    // -- Shutdown --------------------------------------------------------

    if let Err(e) = storage::save_snapshot(&engine.snapshot(), state_file) {
        error!(error = %e, "Failed to save snapshot on shutdown");
    }
    info!(ledger = %engine.ledger(), "Cashout Oracle stopped");

    Ok(())
}

/// Open the configured feed. `CASHOUT_FEED_URL` overrides the socket URL.
async fn open_feed(cfg: &FeedConfig) -> Result<Box<dyn FeedSource>> {
    match cfg.source {
        FeedKind::Websocket => {
            let url = std::env::var("CASHOUT_FEED_URL")
                .ok()
                .or_else(|| cfg.url.clone())
                .context("feed.url (or CASHOUT_FEED_URL) is required for the websocket source")?;
            Ok(Box::new(WebSocketFeed::connect(&url).await?))
        }
        FeedKind::Replay => {
            let path = cfg
                .replay_path
                .as_deref()
                .context("feed.replay_path is required for the replay source")?;
            info!(path, interval_ms = cfg.replay_interval_ms, "Replaying recorded feed");
            Ok(Box::new(ReplayFeed::open(path, cfg.replay_interval_ms).await?))
        }
    }
}

/// Initialise the tracing subscriber.
///
/// Uses JSON format when `CASHOUT_LOG_JSON` is set, human-readable
/// otherwise. `RUST_LOG` overrides the default `cashout_oracle=info` filter.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cashout_oracle=info"));

    let json_logging = std::env::var("CASHOUT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
