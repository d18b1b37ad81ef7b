//! Link card projection and the content-addressed card cache.
//!
//! A card's id depends only on the owning message id, the URL's index in the
//! message and the URL itself, so re-deriving the feed yields the same ids.
//! The cache hands back the same `Arc` while a card's derivation inputs are
//! unchanged, which lets the layout engine detect "nothing moved" by pointer.

use crate::classify::{classify_url, extract_urls, LinkKind, MediaKind};
use crate::filter::FilterPipeline;
use crate::message::{KickEmote, Message};
use crate::settings::DisplayMode;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub const DEFAULT_CARD_CACHE_CAPACITY: usize = 4096;

/// The message a card came from, for the renderer's caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardOwner {
    pub platform: String,
    pub channel: String,
    pub nick: String,
    pub date: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kick_emotes: Option<Vec<KickEmote>>,
}

impl From<&Message> for CardOwner {
    fn from(m: &Message) -> Self {
        Self {
            platform: m.platform.clone(),
            channel: m.channel.clone(),
            nick: m.nick.clone(),
            date: m.date,
            text: m.text.clone(),
            kick_emotes: m.kick_emotes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCard {
    pub id: String,
    pub message_id: String,
    /// URL as it appeared in the message, trimmed.
    pub source_url: String,
    /// URL after redirect unwrapping.
    pub url: String,
    pub kind: LinkKind,
    pub media: MediaKind,
    pub embed_url: Option<String>,
    pub directly_playable: bool,
    pub is_trusted: bool,
    pub is_streaming: bool,
    pub display: DisplayMode,
    /// Bumped by a user "reload"; the renderer recreates the embed when it changes.
    pub reload_nonce: u32,
    pub owner: CardOwner,
}

/// `{message_id}#{index}:{first 16 hex chars of sha256(url)}`
pub fn card_id(message_id: &str, index: usize, url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{message_id}#{index}:{}", &digest[..16])
}

/// Everything a card is derived from besides its id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CardInputs {
    source_url: String,
    is_trusted: bool,
    is_streaming: bool,
    display: DisplayMode,
    reload_nonce: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CardCache {
    cards: LruCache<String, (CardInputs, Arc<LinkCard>)>,
    reload_nonces: HashMap<String, u32>,
    stats: CacheStats,
}

impl Default for CardCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CARD_CACHE_CAPACITY)
    }
}

impl CardCache {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cards: LruCache::new(capacity),
            reload_nonces: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Force the next derivation of `card_id` to produce a fresh card.
    /// Returns the new nonce.
    pub fn bump_reload(&mut self, card_id: &str) -> u32 {
        let nonce = self.reload_nonces.entry(card_id.to_string()).or_insert(0);
        *nonce = nonce.wrapping_add(1);
        *nonce
    }

    pub fn clear(&mut self) {
        self.cards.clear();
    }

    /// Visible cards for a whole feed, newest message first.
    pub fn project_feed<'m>(
        &mut self,
        messages: impl IntoIterator<Item = &'m Message>,
        pipeline: &FilterPipeline<'_>,
    ) -> Vec<Arc<LinkCard>> {
        let mut out = Vec::new();
        for message in messages {
            if pipeline.check_message(message).is_visible() {
                out.extend(self.project_message(message, pipeline));
            }
        }
        out
    }

    /// Visible cards for one message that already passed the message stage.
    pub fn project_message(
        &mut self,
        message: &Message,
        pipeline: &FilterPipeline<'_>,
    ) -> Vec<Arc<LinkCard>> {
        let is_trusted = pipeline.is_trusted(message);
        extract_urls(&message.text)
            .into_iter()
            .enumerate()
            .filter_map(|(index, source_url)| {
                let id = card_id(&message.id, index, &source_url);
                let card = self.derive(id, message, source_url, is_trusted, pipeline);
                let hidden = !pipeline.check_card(&card.source_url, &card.kind).is_visible()
                    || !pipeline.check_card(&card.url, &card.kind).is_visible();
                (!hidden).then_some(card)
            })
            .collect()
    }

    fn derive(
        &mut self,
        id: String,
        message: &Message,
        source_url: String,
        is_trusted: bool,
        pipeline: &FilterPipeline<'_>,
    ) -> Arc<LinkCard> {
        let cached_kind = self.cards.peek(&id).map(|(_, card)| card.kind.clone());
        let display = match &cached_kind {
            Some(kind) => pipeline.display_mode(kind),
            None => DisplayMode::default(),
        };
        let inputs = CardInputs {
            source_url,
            is_trusted,
            is_streaming: message.is_streaming,
            display,
            reload_nonce: self.reload_nonces.get(&id).copied().unwrap_or(0),
        };

        if let Some((cached_inputs, card)) = self.cards.get(&id) {
            if *cached_inputs == inputs {
                self.stats.hits += 1;
                return Arc::clone(card);
            }
        }
        self.stats.misses += 1;

        let classified = classify_url(&inputs.source_url);
        let display = pipeline.display_mode(&classified.kind);
        let inputs = CardInputs { display, ..inputs };
        let card = Arc::new(LinkCard {
            id: id.clone(),
            message_id: message.id.clone(),
            source_url: inputs.source_url.clone(),
            url: classified.url,
            kind: classified.kind,
            media: classified.media,
            embed_url: classified.embed_url,
            directly_playable: classified.directly_playable,
            is_trusted: inputs.is_trusted,
            is_streaming: inputs.is_streaming,
            display: inputs.display,
            reload_nonce: inputs.reload_nonce,
            owner: CardOwner::from(message),
        });
        self.cards.put(id, (inputs, Arc::clone(&card)));
        card
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FilterSettings;

    const NOW: i64 = 1_700_000_000_000;

    fn message(text: &str) -> Message {
        Message::new("dgg", "destinygg", NOW - 1, "alice", text)
    }

    #[test]
    fn one_card_per_url() {
        let settings = FilterSettings::default();
        let pipeline = FilterPipeline::new(&settings, NOW);
        let mut cache = CardCache::default();
        let m = message("a https://a.com/x.png b https://youtu.be/dQw4w9WgXcQ");
        let cards = cache.project_message(&m, &pipeline);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].media, MediaKind::Image);
        assert!(matches!(cards[1].kind, LinkKind::YouTube { .. }));
        assert_eq!(cards[0].message_id, m.id);
        assert_eq!(cards[0].owner.nick, "alice");
    }

    #[test]
    fn ids_are_stable_and_arcs_reused() {
        let settings = FilterSettings::default();
        let pipeline = FilterPipeline::new(&settings, NOW);
        let mut cache = CardCache::default();
        let m = message("https://a.com/x.png");

        let first = cache.project_message(&m, &pipeline);
        let second = cache.project_message(&m, &pipeline);
        assert_eq!(first[0].id, second[0].id);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(first[0].id, card_id(&m.id, 0, "https://a.com/x.png"));
    }

    #[test]
    fn changed_inputs_rederive_under_same_id() {
        let mut settings = FilterSettings::default();
        let mut cache = CardCache::default();
        let m = message("https://a.com/x.png");
        let before = cache.project_message(&m, &FilterPipeline::new(&settings, NOW));

        settings.trust_user("dgg", "alice");
        let after = cache.project_message(&m, &FilterPipeline::new(&settings, NOW));
        assert_eq!(before[0].id, after[0].id);
        assert!(!Arc::ptr_eq(&before[0], &after[0]));
        assert!(after[0].is_trusted);
    }

    #[test]
    fn reload_bumps_nonce() {
        let settings = FilterSettings::default();
        let pipeline = FilterPipeline::new(&settings, NOW);
        let mut cache = CardCache::default();
        let m = message("https://a.com/v.mp4");
        let before = cache.project_message(&m, &pipeline);
        assert_eq!(cache.bump_reload(&before[0].id), 1);
        let after = cache.project_message(&m, &pipeline);
        assert_eq!(after[0].reload_nonce, 1);
        assert!(!Arc::ptr_eq(&before[0], &after[0]));
    }

    #[test]
    fn display_mode_change_rederives() {
        let mut settings = FilterSettings::default();
        let mut cache = CardCache::default();
        let m = message("https://a.com/v.mp4");
        let before = cache.project_message(&m, &FilterPipeline::new(&settings, NOW));
        assert_eq!(before[0].display, DisplayMode::Embed);

        settings.platform_display.insert("video".into(), DisplayMode::Text);
        let after = cache.project_message(&m, &FilterPipeline::new(&settings, NOW));
        assert_eq!(after[0].display, DisplayMode::Text);
    }

    #[test]
    fn banned_redirect_target_is_hidden() {
        let mut settings = FilterSettings::default();
        settings.ban_link("https://youtu.be/dQw4w9WgXcQ");
        let pipeline = FilterPipeline::new(&settings, NOW);
        let mut cache = CardCache::default();
        let m = message("https://www.google.com/url?q=https://youtu.be/dQw4w9WgXcQ");
        assert!(cache.project_message(&m, &pipeline).is_empty());
    }
}
