//! Replay feed: one raw frame per line from a file (or any reader).
//!
//! Blank lines and `#` comments are skipped. An optional delay between
//! frames paces the replay like a live server. Besides socket frames, a
//! line may hold a recorded outcome object `{"value", "seq", "time"}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use super::{parse_replay_line, FeedEvent, FeedSource};

pub struct ReplayFeed<R> {
    lines: Lines<BufReader<R>>,
    interval: Duration,
    started: bool,
}

impl ReplayFeed<tokio::fs::File> {
    pub async fn open(path: &str, interval_ms: u64) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open replay file {path}"))?;
        Ok(Self::new(file, Duration::from_millis(interval_ms)))
    }
}

impl<R: AsyncRead + Unpin + Send> ReplayFeed<R> {
    pub fn new(reader: R, interval: Duration) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            interval,
            started: false,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FeedSource for ReplayFeed<R> {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            let Some(line) = self.lines.next_line().await.context("Failed to read replay line")? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if self.started && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
            self.started = true;
            return Ok(Some(trimmed.to_string()));
        }
    }

    fn decode(&self, raw: &str) -> Option<FeedEvent> {
        parse_replay_line(raw)
    }
}
