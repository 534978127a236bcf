//! Live game-server feed over a WebSocket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::FeedSource;
use crate::types::OracleError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Text frames from a single WebSocket connection. The feed ends when the
/// server closes; reconnecting is left to whoever runs the binary.
pub struct WebSocketFeed {
    url: String,
    stream: WsStream,
}

impl WebSocketFeed {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .with_context(|| format!("Timed out connecting to {url}"))?
            .with_context(|| format!("Failed to connect to {url}"))?;
        info!(url, "Feed connected");
        Ok(Self {
            url: url.to_string(),
            stream,
        })
    }
}

#[async_trait]
impl FeedSource for WebSocketFeed {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("Non-UTF-8 binary frame skipped"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %self.url, ?frame, "Feed closed by server");
                    return Ok(None);
                }
                // Pings are answered by tungstenite on the next read.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %self.url, error = %e, "Feed read failed");
                    return Err(OracleError::Feed(e.to_string()).into());
                }
                None => return Ok(None),
            }
        }
    }
}
