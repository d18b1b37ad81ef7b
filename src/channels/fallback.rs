//! Fallback source: cursor-paginated full-text search over HTTP.
//!
//! `GET {base}/api/v1/search?terms=a,b&channel=c&size=n[&searchAfter=tok]`
//! answers with `{ messages, nextCursor?, hasMore, rateLimit? }`. A rate limit
//! may come as HTTP 429 with `Retry-After` or as a `rateLimit.retryAfter`
//! (seconds) field in an otherwise successful body.

use super::http::{check_status, parse_messages, DEFAULT_RETRY_AFTER};
use super::traits::{FallbackPage, FallbackSource, SourceError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    rate_limit: Option<RateLimitBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct HttpFallbackSource {
    client: reqwest::Client,
    endpoint: Url,
    platform: String,
    channel: String,
}

impl HttpFallbackSource {
    pub fn new(base_url: &str, platform: &str, channel: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("api/v1/search"))
            .with_context(|| format!("Invalid fallback base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build fallback HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            platform: platform.to_string(),
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl FallbackSource for HttpFallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn search(
        &self,
        terms: &[String],
        cursor: Option<&str>,
        size: usize,
    ) -> Result<FallbackPage, SourceError> {
        debug!(terms = ?terms, cursor = ?cursor, size, "Querying full-text search");
        let mut query = vec![
            ("terms", terms.join(",")),
            ("channel", self.channel.clone()),
            ("size", size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("searchAfter", cursor.to_string()));
        }

        let resp = self
            .client
            .get(self.endpoint.clone())
            .query(&query)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: SearchResponse = resp.json().await?;

        if let Some(limit) = body.rate_limit {
            let retry_after = limit
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(SourceError::RateLimited { retry_after });
        }

        Ok(FallbackPage {
            messages: parse_messages(body.messages, &self.platform, &self.channel, self.name()),
            next_cursor: body.next_cursor.filter(|c| !c.is_empty()),
            has_more: body.has_more,
        })
    }
}
