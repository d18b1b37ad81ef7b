//! Primary source: per-term mentions search over HTTP.
//!
//! `GET {base}/api/v1/mentions?username={term}&size={size}&offset={offset}`
//! answers with a JSON array of messages, newest first.

use super::http::{check_status, parse_messages};
use super::traits::{MentionsSource, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use linkwall_core::Message;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct HttpMentionsSource {
    client: reqwest::Client,
    endpoint: Url,
    platform: String,
    channel: String,
}

impl HttpMentionsSource {
    pub fn new(base_url: &str, platform: &str, channel: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("api/v1/mentions"))
            .with_context(|| format!("Invalid mentions base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build mentions HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            platform: platform.to_string(),
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl MentionsSource for HttpMentionsSource {
    fn name(&self) -> &str {
        "mentions"
    }

    async fn search(&self, term: &str, size: usize, offset: usize) -> Result<Vec<Message>, SourceError> {
        debug!(term = %term, size, offset, "Querying mentions");
        let resp = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("username", term.to_string()),
                ("size", size.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let body: Value = resp.json().await?;
        let Value::Array(entries) = body else {
            return Err(SourceError::Malformed("expected a JSON array".into()));
        };
        Ok(parse_messages(entries, &self.platform, &self.channel, self.name()))
    }
}
