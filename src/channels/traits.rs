use async_trait::async_trait;
use linkwall_core::Message;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Failure of one source call.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Malformed(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Per-term historical search (the primary source).
#[async_trait]
pub trait MentionsSource: Send + Sync {
    fn name(&self) -> &str;

    /// One page of messages mentioning `term`, newest first.
    async fn search(&self, term: &str, size: usize, offset: usize) -> Result<Vec<Message>, SourceError>;
}

/// One page from the full-text fallback source.
#[derive(Debug, Clone, Default)]
pub struct FallbackPage {
    pub messages: Vec<Message>,
    /// Opaque search-after token for the next page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Cursor-paginated full-text search over all terms at once.
#[async_trait]
pub trait FallbackSource: Send + Sync {
    fn name(&self) -> &str;

    /// Empty `terms` means "everything in the configured channel".
    async fn search(
        &self,
        terms: &[String],
        cursor: Option<&str>,
        size: usize,
    ) -> Result<FallbackPage, SourceError>;
}

/// What a live stream pushes.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Backlog sent on (re)connect; historical, not streaming.
    History(Vec<Message>),
    /// One message as it happens.
    Message(Message),
}

/// Push-based chat stream.
#[async_trait]
pub trait LiveSource: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `shutdown` fires or `tx` is closed, reconnecting as needed.
    async fn listen(&self, tx: mpsc::Sender<LiveEvent>, shutdown: CancellationToken);
}
