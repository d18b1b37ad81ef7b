//! Visibility decisions for messages and the cards derived from them.

use crate::classify::LinkKind;
use crate::mention::TermMatcher;
use crate::message::Message;
use crate::settings::{DisplayMode, FilterSettings};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static NSFW_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bnsfw\b").unwrap());
static NSFL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bnsfl\b").unwrap());

/// Why something was hidden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiddenReason {
    Nsfw,
    Nsfl,
    BannedTerm(String),
    BannedUser,
    MutedUser,
    BannedMessage,
    NotRelevant,
    BannedLink,
    PlatformFiltered(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Visible,
    Hidden(HiddenReason),
}

impl Verdict {
    pub fn is_visible(&self) -> bool {
        matches!(self, Verdict::Visible)
    }
}

/// One evaluation context, built from a settings snapshot. Rebuild it when
/// the settings change.
pub struct FilterPipeline<'a> {
    settings: &'a FilterSettings,
    matcher: Cow<'a, TermMatcher>,
    now_ms: i64,
}

impl<'a> FilterPipeline<'a> {
    /// Compiles a matcher for `settings.terms`.
    pub fn new(settings: &'a FilterSettings, now_ms: i64) -> Self {
        Self {
            settings,
            matcher: Cow::Owned(TermMatcher::new(&settings.terms)),
            now_ms,
        }
    }

    /// Reuses a matcher already compiled for `settings.terms`.
    pub fn with_matcher(settings: &'a FilterSettings, matcher: &'a TermMatcher, now_ms: i64) -> Self {
        Self {
            settings,
            matcher: Cow::Borrowed(matcher),
            now_ms,
        }
    }

    pub fn settings(&self) -> &FilterSettings {
        self.settings
    }

    /// Message-level stages, in order: banned message, users, NSFW/NSFL,
    /// banned terms, then term relevance.
    pub fn check_message(&self, message: &Message) -> Verdict {
        let s = self.settings;
        if s.banned_messages.contains(&message.id) {
            return Verdict::Hidden(HiddenReason::BannedMessage);
        }
        if s.is_banned_user(&message.platform, &message.nick) {
            return Verdict::Hidden(HiddenReason::BannedUser);
        }
        if s.is_muted(&message.platform, &message.nick, self.now_ms) {
            return Verdict::Hidden(HiddenReason::MutedUser);
        }
        if !s.show_nsfw && NSFW_RE.is_match(&message.text) {
            return Verdict::Hidden(HiddenReason::Nsfw);
        }
        if !s.show_nsfl && NSFL_RE.is_match(&message.text) {
            return Verdict::Hidden(HiddenReason::Nsfl);
        }
        if let Some(term) = self.banned_term_in(&message.text) {
            return Verdict::Hidden(HiddenReason::BannedTerm(term.to_string()));
        }
        if !self.matcher.is_relevant(&message.text) {
            return Verdict::Hidden(HiddenReason::NotRelevant);
        }
        Verdict::Visible
    }

    /// Substring, not word-bounded.
    fn banned_term_in(&self, text: &str) -> Option<&str> {
        if self.settings.banned_terms.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        self.settings
            .banned_terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Card-level stages: banned link, then per-platform display mode.
    pub fn check_card(&self, url: &str, kind: &LinkKind) -> Verdict {
        if self.settings.is_banned_link(url) {
            return Verdict::Hidden(HiddenReason::BannedLink);
        }
        if self.settings.display_mode(kind.platform()) == DisplayMode::Filter {
            return Verdict::Hidden(HiddenReason::PlatformFiltered(kind.platform()));
        }
        Verdict::Visible
    }

    pub fn is_trusted(&self, message: &Message) -> bool {
        self.settings.is_trusted_user(&message.platform, &message.nick)
    }

    pub fn display_mode(&self, kind: &LinkKind) -> DisplayMode {
        self.settings.display_mode(kind.platform())
    }
}
