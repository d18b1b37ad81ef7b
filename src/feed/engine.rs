//! The feed engine: drives the sources, owns the merged store, and keeps the
//! filtered card list and its masonry layout current.
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across an
//! `.await`. Network calls happen outside the lock; their results are checked
//! against the cursor generation before merging, so results for a term set
//! that has since been replaced are dropped.

use crate::channels::{FallbackSource, LiveEvent, LiveSource, MentionsSource, SourceError};
use crate::config::{Config, SettingsStore};
use futures_util::future::join_all;
use linkwall_core::{
    column_count_for_width, CardCache, CursorManager, DisplayMode, FetchPlan, FilterPipeline,
    FilterSettings, LinkCard, MasonryLayout, MergeStore, Message, PrimaryOutcome, TermMatcher,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LIVE_CHANNEL_CAPACITY: usize = 1024;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Tunables, usually taken from `[feed]` and `[layout]`.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub page_size: usize,
    pub history_wait: Duration,
    pub load_more_threshold: usize,
    pub card_cache_capacity: usize,
    pub min_column_width: u32,
    pub max_columns: usize,
    pub viewport_width: u32,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl FeedOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.feed.page_size,
            history_wait: Duration::from_secs(config.feed.history_wait_secs),
            load_more_threshold: config.feed.load_more_threshold,
            card_cache_capacity: config.feed.card_cache_capacity,
            min_column_width: config.layout.min_column_width,
            max_columns: config.layout.max_columns,
            viewport_width: config.layout.viewport_width,
        }
    }

    fn column_count(&self, viewport_width: u32) -> usize {
        column_count_for_width(viewport_width, self.min_column_width, self.max_columns)
    }
}

#[derive(Clone, Default)]
pub struct Sources {
    pub mentions: Option<Arc<dyn MentionsSource>>,
    pub fallback: Option<Arc<dyn FallbackSource>>,
    pub live: Vec<Arc<dyn LiveSource>>,
}

/// Result of one trigger of a fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FetchStatus {
    Fetched { added: usize },
    /// Another cycle was in flight; this trigger was dropped.
    Busy,
    Exhausted,
    #[serde(rename_all = "camelCase")]
    RateLimited { retry_at: i64 },
    Failed { error: String },
    /// Scroll position was not close enough to the end.
    NotNeeded,
}

/// Snapshot handed to the rendering surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedView {
    pub terms: Vec<String>,
    pub cards: Vec<Arc<LinkCard>>,
    /// Card ids per column, top to bottom.
    pub columns: Vec<Vec<String>>,
    /// Estimated pixel height per column.
    pub column_heights: Vec<u64>,
    /// Unfiltered message count.
    pub message_count: usize,
    pub has_more: bool,
    pub loading: bool,
    pub using_fallback: bool,
    pub error: Option<String>,
}

/// Partial settings update from the settings form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub show_nsfw: Option<bool>,
    pub show_nsfl: Option<bool>,
    pub banned_terms: Option<Vec<String>>,
    pub platform_display: Option<BTreeMap<String, DisplayMode>>,
}

struct FeedState {
    store: MergeStore,
    cursor: CursorManager,
    matcher: TermMatcher,
    settings: FilterSettings,
    cards: CardCache,
    layout: MasonryLayout,
    visible: Vec<Arc<LinkCard>>,
    last_error: Option<String>,
    /// Earliest pending mute expiry as of the last rebuild.
    next_mute_expiry: Option<i64>,
    /// Bumped on every settings change; orders persisted snapshots.
    settings_seq: u64,
}

impl FeedState {
    fn tag(&self, mut message: Message) -> Message {
        let hits = self.matcher.matched_terms(&message.text);
        message.matched_terms.extend(hits);
        message
    }

    fn rebuild(&mut self, now: i64) {
        let pipeline = FilterPipeline::with_matcher(&self.settings, &self.matcher, now);
        let cards = self.cards.project_feed(self.store.messages(), &pipeline);
        let change = self.layout.layout(cards.clone(), self.layout.column_count());
        debug!(cards = cards.len(), messages = self.store.len(), ?change, "Feed rebuilt");
        self.visible = cards;
        self.next_mute_expiry = self
            .settings
            .muted_users
            .iter()
            .map(|m| m.mute_expiry)
            .filter(|&expiry| expiry > now)
            .min();
    }

    /// Rebuild if a mute has lapsed since the last rebuild.
    fn refresh_expired_mutes(&mut self, now: i64) {
        if self.next_mute_expiry.is_some_and(|expiry| expiry <= now) {
            debug!("Mute expired, re-filtering");
            self.rebuild(now);
        }
    }

    fn reset_for_terms(&mut self, now: i64) {
        self.matcher = TermMatcher::new(&self.settings.terms);
        self.cursor.reset(&self.settings.terms);
        self.store.reset();
        self.last_error = None;
        self.rebuild(now);
    }
}

/// Held for the duration of a fetch cycle; released on drop, including on
/// early returns and cancellation.
struct FetchGuard<'a>(&'a AtomicBool);

impl<'a> FetchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Cycle {
    Done(FetchStatus),
    /// Term set changed while the fetch was out.
    Stale,
    EngageFallback,
}

pub struct Feed {
    state: Mutex<FeedState>,
    sources: Sources,
    settings_store: Option<Arc<SettingsStore>>,
    options: FeedOptions,
    fetching: AtomicBool,
    shutdown: CancellationToken,
}

impl Feed {
    pub fn new(
        sources: Sources,
        settings: FilterSettings,
        settings_store: Option<SettingsStore>,
        options: FeedOptions,
    ) -> Self {
        let column_count = options.column_count(options.viewport_width);
        let state = FeedState {
            store: MergeStore::new(),
            cursor: CursorManager::new(&settings.terms, options.page_size),
            matcher: TermMatcher::new(&settings.terms),
            cards: CardCache::with_capacity(options.card_cache_capacity),
            layout: MasonryLayout::new(column_count),
            settings,
            visible: Vec::new(),
            last_error: None,
            next_mute_expiry: None,
            settings_seq: 0,
        };
        Self {
            state: Mutex::new(state),
            sources,
            settings_store: settings_store.map(Arc::new),
            options,
            fetching: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start every live source, wait (bounded) for their history bursts, then
    /// run the initial fetch.
    pub async fn start(self: &Arc<Self>) -> FetchStatus {
        let mut ready = Vec::with_capacity(self.sources.live.len());
        for source in &self.sources.live {
            let (tx, rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
            let (ready_tx, ready_rx) = oneshot::channel();

            let listener = Arc::clone(source);
            let token = self.shutdown.child_token();
            tokio::spawn(async move {
                listener.listen(tx, token).await;
            });

            let feed = Arc::clone(self);
            let name = source.name().to_string();
            tokio::spawn(async move {
                feed.drain_live(name, rx, ready_tx).await;
            });
            ready.push(ready_rx);
        }

        join_all(ready).await;
        info!(live = self.sources.live.len(), "Live sources ready, running initial fetch");
        self.load(false).await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn drain_live(
        self: Arc<Self>,
        name: String,
        mut rx: mpsc::Receiver<LiveEvent>,
        ready: oneshot::Sender<()>,
    ) {
        match tokio::time::timeout(self.options.history_wait, rx.recv()).await {
            Ok(Some(event)) => self.apply_live(&name, event),
            Ok(None) => {
                let _ = ready.send(());
                info!(source = %name, "Live source closed before sending anything");
                return;
            }
            Err(_) => warn!(
                source = %name,
                "No history within {}s, continuing without it",
                self.options.history_wait.as_secs_f32()
            ),
        }
        let _ = ready.send(());

        while let Some(event) = rx.recv().await {
            self.apply_live(&name, event);
        }
        debug!(source = %name, "Live channel closed");
    }

    /// Merge one live event immediately, independent of any fetch cycle.
    pub fn apply_live(&self, source: &str, event: LiveEvent) {
        let now = now_ms();
        let mut st = self.state.lock();
        match event {
            LiveEvent::History(messages) => {
                let tagged: Vec<Message> = messages.into_iter().map(|m| st.tag(m)).collect();
                let outcome = st.store.merge_historical(tagged, false);
                debug!(source = %source, added = outcome.added, skipped = outcome.skipped, "Merged live history");
            }
            LiveEvent::Message(message) => {
                let tagged = st.tag(message);
                if !st.store.merge_streaming(tagged) {
                    return;
                }
            }
        }
        st.rebuild(now);
    }

    /// One fetch cycle. `append` is "load more"; otherwise the first page.
    pub async fn load(&self, append: bool) -> FetchStatus {
        let Some(guard) = FetchGuard::acquire(&self.fetching) else {
            debug!("Fetch cycle already in flight, dropping trigger");
            return FetchStatus::Busy;
        };

        let mut append = append;
        loop {
            let (plan, generation) = {
                let st = self.state.lock();
                (st.cursor.plan(append, now_ms()), st.cursor.generation())
            };

            let cycle = match plan {
                FetchPlan::Exhausted => Cycle::Done(FetchStatus::Exhausted),
                FetchPlan::RateLimited { retry_at } => {
                    self.state.lock().last_error = Some(rate_limit_message(retry_at));
                    Cycle::Done(FetchStatus::RateLimited { retry_at })
                }
                FetchPlan::Primary { terms, offset, size } => {
                    self.fetch_primary(&terms, offset, size, append, generation).await
                }
                FetchPlan::Fallback { terms, cursor, size } => {
                    self.fetch_fallback(&terms, cursor, size, generation).await
                }
            };

            match cycle {
                Cycle::Done(status) => {
                    // The guard is released under the state lock: a term
                    // change either shows up in this check or finds the
                    // guard free.
                    let st = self.state.lock();
                    if st.cursor.generation() != generation {
                        debug!("Term set changed during the cycle, fetching its first page");
                        append = false;
                        continue;
                    }
                    drop(guard);
                    drop(st);
                    return status;
                }
                Cycle::Stale => {
                    debug!("Discarded results for a superseded term set");
                    append = false;
                }
                Cycle::EngageFallback => append = false,
            }
        }
    }

    async fn fetch_primary(
        &self,
        terms: &[String],
        offset: usize,
        size: usize,
        append: bool,
        generation: u64,
    ) -> Cycle {
        let results = match &self.sources.mentions {
            Some(source) => {
                join_all(terms.iter().map(|term| {
                    let source = Arc::clone(source);
                    async move { (term, source.search(term, size, offset).await) }
                }))
                .await
            }
            None => Vec::new(),
        };

        let mut page_lengths = Vec::with_capacity(terms.len());
        let mut batch = Vec::new();
        for (term, result) in results {
            match result {
                Ok(messages) => {
                    page_lengths.push(messages.len());
                    batch.extend(messages.into_iter().map(|m| m.with_terms([term.clone()])));
                }
                Err(e) => {
                    warn!(term = %term, "Mentions search failed: {e}");
                    page_lengths.push(0);
                }
            }
        }
        let unique = batch
            .iter()
            .filter(|m| m.is_well_formed())
            .map(|m| m.id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let now = now_ms();
        let mut st = self.state.lock();
        if st.cursor.generation() != generation {
            return Cycle::Stale;
        }
        match st.cursor.record_primary(append, &page_lengths, unique) {
            PrimaryOutcome::EngageFallback => {
                info!(terms = ?terms, "Mentions returned nothing, switching to full-text search");
                Cycle::EngageFallback
            }
            PrimaryOutcome::Continue => {
                let tagged: Vec<Message> = batch.into_iter().map(|m| st.tag(m)).collect();
                let outcome = st.store.merge_historical(tagged, append);
                st.last_error = None;
                st.rebuild(now);
                Cycle::Done(FetchStatus::Fetched { added: outcome.added })
            }
        }
    }

    async fn fetch_fallback(
        &self,
        terms: &[String],
        cursor: Option<String>,
        size: usize,
        generation: u64,
    ) -> Cycle {
        let Some(source) = &self.sources.fallback else {
            let mut st = self.state.lock();
            if st.cursor.generation() != generation {
                return Cycle::Stale;
            }
            st.cursor.record_fallback(None, false);
            return Cycle::Done(FetchStatus::Exhausted);
        };

        let result = source.search(terms, cursor.as_deref(), size).await;

        let now = now_ms();
        let mut st = self.state.lock();
        if st.cursor.generation() != generation {
            return Cycle::Stale;
        }
        match result {
            Ok(page) => {
                st.cursor.record_fallback(page.next_cursor, page.has_more);
                let tagged: Vec<Message> = page.messages.into_iter().map(|m| st.tag(m)).collect();
                let outcome = st.store.merge_historical(tagged, cursor.is_some());
                st.last_error = None;
                st.rebuild(now);
                Cycle::Done(FetchStatus::Fetched { added: outcome.added })
            }
            Err(SourceError::RateLimited { retry_after }) => {
                let retry_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX);
                let retry_at = st.cursor.record_rate_limit(retry_ms, now);
                let message = rate_limit_message(retry_at);
                warn!("{message}");
                st.last_error = Some(message);
                Cycle::Done(FetchStatus::RateLimited { retry_at })
            }
            Err(e) => {
                let message = format!("Search failed: {e}");
                warn!("{message}");
                st.last_error = Some(message.clone());
                Cycle::Done(FetchStatus::Failed { error: message })
            }
        }
    }

    pub async fn load_more(&self) -> FetchStatus {
        self.load(true).await
    }

    /// Load more only when `last_visible_index` is within the proximity
    /// threshold of the end of the rendered list.
    pub async fn on_scroll(&self, last_visible_index: usize) -> FetchStatus {
        let (remaining, has_more) = {
            let st = self.state.lock();
            (
                st.visible.len().saturating_sub(last_visible_index.saturating_add(1)),
                st.cursor.has_more(),
            )
        };
        if !has_more {
            return FetchStatus::Exhausted;
        }
        if remaining > self.options.load_more_threshold {
            return FetchStatus::NotNeeded;
        }
        self.load(true).await
    }

    /// Drop everything for the current term set and fetch again.
    pub async fn refresh(&self) -> FetchStatus {
        {
            let mut st = self.state.lock();
            st.reset_for_terms(now_ms());
        }
        self.load(false).await
    }

    /// Switch the active term set. Late results for the old set are dropped.
    pub async fn set_terms(&self, terms: &[String]) -> FetchStatus {
        let now = now_ms();
        let (seq, snapshot) = {
            let mut st = self.state.lock();
            st.settings.set_terms(terms);
            st.reset_for_terms(now);
            st.settings_seq += 1;
            info!(terms = ?st.settings.terms, "Filter terms changed");
            (st.settings_seq, st.settings.clone())
        };
        self.persist(seq, snapshot, now);
        self.load(false).await
    }

    /// Recompute the column count for a new viewport width and relayout.
    pub fn set_viewport(&self, width: u32) -> usize {
        let columns = self.options.column_count(width);
        let mut st = self.state.lock();
        let cards = st.visible.clone();
        let change = st.layout.layout(cards, columns);
        debug!(width, columns, ?change, "Viewport changed");
        columns
    }

    pub fn ban_user(&self, platform: &str, nick: &str) {
        self.mutate_settings(|s| s.ban_user(platform, nick));
    }

    pub fn trust_user(&self, platform: &str, nick: &str) {
        self.mutate_settings(|s| s.trust_user(platform, nick));
    }

    pub fn mute_user(&self, platform: &str, nick: &str, duration: Duration) {
        let until = now_ms().saturating_add(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX));
        self.mutate_settings(|s| s.mute_user(platform, nick, until));
    }

    pub fn ban_link(&self, url: &str) {
        self.mutate_settings(|s| s.ban_link(url));
    }

    pub fn ban_message(&self, message_id: &str) {
        self.mutate_settings(|s| s.ban_message(message_id));
    }

    pub fn update_settings(&self, patch: SettingsPatch) {
        self.mutate_settings(|s| {
            if let Some(v) = patch.show_nsfw {
                s.show_nsfw = v;
            }
            if let Some(v) = patch.show_nsfl {
                s.show_nsfl = v;
            }
            if let Some(terms) = patch.banned_terms {
                s.banned_terms = terms
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            if let Some(display) = patch.platform_display {
                s.platform_display = display;
            }
        });
    }

    /// Re-derive one card's embed in place. Returns false for unknown ids.
    pub fn reload_card(&self, card_id: &str) -> bool {
        let mut st = self.state.lock();
        if !st.visible.iter().any(|c| c.id == card_id) {
            return false;
        }
        let nonce = st.cards.bump_reload(card_id);
        debug!(card = %card_id, nonce, "Reloading card");
        st.rebuild(now_ms());
        true
    }

    fn mutate_settings(&self, apply: impl FnOnce(&mut FilterSettings)) {
        let now = now_ms();
        let (seq, snapshot) = {
            let mut st = self.state.lock();
            apply(&mut st.settings);
            st.rebuild(now);
            st.settings_seq += 1;
            (st.settings_seq, st.settings.clone())
        };
        self.persist(seq, snapshot, now);
    }

    /// Write snapshot `seq` on the blocking pool. Older snapshots that finish
    /// late are skipped by the store.
    fn persist(&self, seq: u64, mut settings: FilterSettings, now: i64) {
        let Some(store) = &self.settings_store else {
            return;
        };
        let store = Arc::clone(store);
        let mut write = move || match store.save_snapshot(seq, &mut settings, now) {
            Ok(true) => {}
            Ok(false) => debug!(seq, "Skipped superseded settings snapshot"),
            Err(e) => error!("Failed to save settings: {e}"),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> FilterSettings {
        self.state.lock().settings.clone()
    }

    pub fn view(&self) -> FeedView {
        let mut st = self.state.lock();
        st.refresh_expired_mutes(now_ms());
        FeedView {
            terms: st.cursor.terms().to_vec(),
            cards: st.visible.clone(),
            columns: st.layout.column_ids(),
            column_heights: st.layout.column_heights(),
            message_count: st.store.len(),
            has_more: st.cursor.has_more(),
            loading: self.is_loading(),
            using_fallback: st.cursor.cursor().using_fallback,
            error: st.last_error.clone(),
        }
    }
}

/// User-facing text for a rate limit that lifts at `retry_at` (epoch ms).
pub fn rate_limit_message(retry_at: i64) -> String {
    let when = chrono::DateTime::from_timestamp_millis(retry_at)
        .map(|t| t.format("%H:%M:%S UTC").to_string())
        .unwrap_or_else(|| retry_at.to_string());
    format!("Search is rate limited, retry after {when}")
}
