//! Scripted sources for driving a `Feed` without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use linkwall::channels::{
    FallbackPage, FallbackSource, LiveEvent, LiveSource, MentionsSource, SourceError,
};
use linkwall::feed::{Feed, FeedOptions, Sources};
use linkwall_core::{FilterSettings, Message};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn msg(date: i64, nick: &str, text: &str) -> Message {
    Message::new("dgg", "destinygg", date, nick, text)
}

pub fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
pub struct FakeMentions {
    pub pages: HashMap<String, Vec<Message>>,
    pub failing: HashSet<String>,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<(String, usize, usize)>>,
}

impl FakeMentions {
    pub fn with_page(mut self, term: &str, messages: Vec<Message>) -> Self {
        self.pages.insert(term.to_string(), messages);
        self
    }

    pub fn failing(mut self, term: &str) -> Self {
        self.failing.insert(term.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn called_terms(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _, _)| t.clone()).collect()
    }
}

#[async_trait]
impl MentionsSource for FakeMentions {
    fn name(&self) -> &str {
        "fake-mentions"
    }

    async fn search(&self, term: &str, size: usize, offset: usize) -> Result<Vec<Message>, SourceError> {
        self.calls.lock().push((term.to_string(), size, offset));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(term) {
            return Err(SourceError::Transport("connection reset".into()));
        }
        let page = self.pages.get(term).cloned().unwrap_or_default();
        Ok(page.into_iter().skip(offset).take(size).collect())
    }
}

#[derive(Default)]
pub struct FakeFallback {
    pub responses: Mutex<VecDeque<Result<FallbackPage, SourceError>>>,
    pub calls: Mutex<Vec<(Vec<String>, Option<String>)>>,
}

impl FakeFallback {
    pub fn push(self, response: Result<FallbackPage, SourceError>) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<(Vec<String>, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FallbackSource for FakeFallback {
    fn name(&self) -> &str {
        "fake-fallback"
    }

    async fn search(
        &self,
        terms: &[String],
        cursor: Option<&str>,
        _size: usize,
    ) -> Result<FallbackPage, SourceError> {
        self.calls
            .lock()
            .push((terms.to_vec(), cursor.map(str::to_string)));
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(FallbackPage::default()))
    }
}

/// Sends its script, then stays connected until shutdown.
pub struct ScriptedLive {
    pub events: Vec<LiveEvent>,
}

#[async_trait]
impl LiveSource for ScriptedLive {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn listen(&self, tx: mpsc::Sender<LiveEvent>, shutdown: CancellationToken) {
        for event in self.events.clone() {
            if tx.send(event).await.is_err() {
                return;
            }
        }
        shutdown.cancelled().await;
    }
}

pub fn feed_with(sources: Sources, search_terms: &[&str], options: FeedOptions) -> Arc<Feed> {
    let mut settings = FilterSettings::default();
    settings.set_terms(&terms(search_terms));
    Arc::new(Feed::new(sources, settings, None, options))
}

pub fn options(page_size: usize) -> FeedOptions {
    FeedOptions {
        page_size,
        history_wait: Duration::from_millis(100),
        ..FeedOptions::default()
    }
}
