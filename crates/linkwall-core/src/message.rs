//! The common message shape every source adapter normalizes into.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Positional emote overlay carried by Kick chat messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickEmote {
    pub id: String,
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// One observed chat/feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Composite key `platform:channel:epochMillis:nick`.
    pub id: String,
    pub platform: String,
    pub channel: String,
    /// Epoch milliseconds.
    pub date: i64,
    pub nick: String,
    pub text: String,
    #[serde(default)]
    pub matched_terms: BTreeSet<String>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick_emotes: Option<Vec<KickEmote>>,
}

/// Build the composite identity for a message.
pub fn message_id(platform: &str, channel: &str, date: i64, nick: &str) -> String {
    format!("{platform}:{channel}:{date}:{nick}")
}

impl Message {
    pub fn new(
        platform: impl Into<String>,
        channel: impl Into<String>,
        date: i64,
        nick: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let platform = platform.into();
        let channel = channel.into();
        let nick = nick.into();
        Self {
            id: message_id(&platform, &channel, date, &nick),
            platform,
            channel,
            date,
            nick,
            text: text.into(),
            matched_terms: BTreeSet::new(),
            is_streaming: false,
            kick_emotes: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.is_streaming = true;
        self
    }

    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matched_terms.extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn with_kick_emotes(mut self, emotes: Vec<KickEmote>) -> Self {
        self.kick_emotes = Some(emotes);
        self
    }

    /// Minimal shape check applied before a message may enter the store.
    ///
    /// The id must agree with the identity fields, otherwise two records for the
    /// same logical event could coexist under different keys.
    pub fn is_well_formed(&self) -> bool {
        !self.platform.is_empty()
            && !self.nick.is_empty()
            && self.date > 0
            && self.id == message_id(&self.platform, &self.channel, self.date, &self.nick)
    }
}
