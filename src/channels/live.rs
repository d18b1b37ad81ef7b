//! Live chat over WebSocket.
//!
//! Frames are JSON objects tagged by `type`:
//! `{"type":"history","messages":[...]}` right after connecting, then
//! `{"type":"message","message":{...}}` per chat line. Anything else is ignored.

use super::http::{parse_messages, WireMessage};
use super::traits::{LiveEvent, LiveSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct WsLiveSource {
    name: String,
    url: String,
    platform: String,
    channel: String,
    reconnect_delay: Duration,
}

impl WsLiveSource {
    pub fn new(name: &str, url: &str, platform: &str, channel: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            platform: platform.to_string(),
            channel: channel.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    async fn run_ws_loop(&self, tx: &mpsc::Sender<LiveEvent>) -> Result<()> {
        info!(source = %self.name, "Connecting to {}...", self.url);
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .context("WebSocket connection failed")?;
        info!(source = %self.name, "Connected to '{}'", self.url);

        let (mut write, mut read) = ws.split();
        while let Some(msg) = read.next().await {
            let msg = msg.context("WebSocket read error")?;
            let text = match msg {
                WsMessage::Text(t) => t.to_string(),
                WsMessage::Ping(d) => {
                    write.send(WsMessage::Pong(d)).await.ok();
                    continue;
                }
                WsMessage::Close(_) => {
                    info!(source = %self.name, "Server sent close frame");
                    return Ok(());
                }
                _ => continue,
            };

            let Some(event) = parse_frame(&text, &self.platform, &self.channel) else {
                continue;
            };
            if tx.send(event).await.is_err() {
                // Feed is gone.
                return Ok(());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LiveSource for WsLiveSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, tx: mpsc::Sender<LiveEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(source = %self.name, "Live source shutting down");
                    return;
                }
                result = self.run_ws_loop(&tx) => match result {
                    Ok(()) => info!(source = %self.name, "WebSocket loop ended cleanly, reconnecting..."),
                    Err(e) => error!(source = %self.name, "WebSocket error: {e:#}, reconnecting in {}s...", self.reconnect_delay.as_secs()),
                },
            }
            if tx.is_closed() {
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}

/// Decode one text frame. Unknown or broken frames yield `None`.
pub fn parse_frame(text: &str, platform: &str, channel: &str) -> Option<LiveEvent> {
    let parsed: Value = serde_json::from_str(text).ok()?;
    match parsed.get("type").and_then(Value::as_str)? {
        "history" => {
            let entries = parsed.get("messages")?.as_array()?.clone();
            let mut messages = parse_messages(entries, platform, channel, "live");
            for m in &mut messages {
                m.is_streaming = false;
            }
            Some(LiveEvent::History(messages))
        }
        "message" => {
            let payload = parsed.get("message")?.clone();
            match serde_json::from_value::<WireMessage>(payload) {
                Ok(wire) => Some(LiveEvent::Message(wire.into_message(platform, channel).streaming())),
                Err(e) => {
                    debug!("Skipping malformed live message: {e}");
                    None
                }
            }
        }
        _ => None,
    }
}
