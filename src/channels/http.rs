//! Shared plumbing for the HTTP-backed sources.

use super::traits::SourceError;
use linkwall_core::{KickEmote, Message};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Used when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

const ERROR_BODY_PREVIEW: usize = 200;

/// Wire shape of one message, as both search APIs and the live sockets send it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Epoch milliseconds.
    pub date: i64,
    pub nick: String,
    pub text: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub kick_emotes: Option<Vec<KickEmote>>,
}

impl WireMessage {
    pub fn into_message(self, default_platform: &str, default_channel: &str) -> Message {
        let platform = self.platform.unwrap_or_else(|| default_platform.to_string());
        let channel = self.channel.unwrap_or_else(|| default_channel.to_string());
        let message = Message::new(platform, channel, self.date, self.nick, self.text);
        match self.kick_emotes {
            Some(emotes) => message.with_kick_emotes(emotes),
            None => message,
        }
    }
}

/// Normalize a JSON array of wire messages, skipping entries that do not fit.
pub fn parse_messages(values: Vec<Value>, platform: &str, channel: &str, source: &str) -> Vec<Message> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<WireMessage>(value) {
            Ok(wire) => Some(wire.into_message(platform, channel)),
            Err(e) => {
                debug!(source = %source, "Skipping malformed entry: {e}");
                None
            }
        })
        .collect()
}

/// `Retry-After` as delta-seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Turn non-success responses into a [`SourceError`].
pub async fn check_status(resp: Response) -> Result<Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(resp.headers()).unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(SourceError::RateLimited { retry_after });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn malformed_entries_are_skipped() {
        let values = vec![
            json!({"date": 10, "nick": "a", "text": "hi"}),
            json!({"nick": "no-date", "text": "x"}),
            json!("not an object"),
            json!({"date": 11, "nick": "b", "text": "yo", "platform": "kick", "channel": "xqc",
                   "kickEmotes": [{"id": "1", "name": "KEKW", "start": 0, "end": 3}]}),
        ];
        let messages = parse_messages(values, "dgg", "destinygg", "test");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "dgg:destinygg:10:a");
        assert_eq!(messages[1].platform, "kick");
        assert_eq!(messages[1].kick_emotes.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));
    }
}
