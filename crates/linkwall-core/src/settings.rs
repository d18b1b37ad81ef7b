//! Persisted filter settings and their versioned migration.
//!
//! Settings travel as camelCase JSON. Older shapes are upgraded on a raw
//! [`serde_json::Value`] before typed deserialization so unknown or missing
//! fields never fail a load.

use crate::classify::normalize_link;
use crate::mention::normalize_terms;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Current on-disk shape.
pub const SETTINGS_VERSION: u64 = 3;

/// Platform value of legacy entries that were stored without one.
pub const ANY_PLATFORM: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings must be a JSON object, got {0}")]
    Shape(&'static str),
}

/// How cards of one link type are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Hide every card of the type.
    Filter,
    /// Keep the card but render it as a plain link.
    Text,
    #[default]
    Embed,
}

/// A `(platform, nick)` pair, serialized as `platform:nick`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserKey {
    pub platform: String,
    pub nick: String,
}

impl UserKey {
    pub fn new(platform: &str, nick: &str) -> Self {
        Self {
            platform: platform.trim().to_lowercase(),
            nick: nick.trim().to_lowercase(),
        }
    }

    /// True when this entry applies to `nick` on `platform`. Comparison uses
    /// the same Unicode lowercasing as [`UserKey::new`].
    pub fn matches(&self, platform: &str, nick: &str) -> bool {
        (self.platform == ANY_PLATFORM || self.platform == platform.trim().to_lowercase())
            && self.nick == nick.trim().to_lowercase()
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.nick)
    }
}

impl From<UserKey> for String {
    fn from(key: UserKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for UserKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let key = match raw.split_once(':') {
            Some((platform, nick)) if !platform.trim().is_empty() => UserKey::new(platform, nick),
            Some((_, nick)) => UserKey::new(ANY_PLATFORM, nick),
            None => UserKey::new(ANY_PLATFORM, &raw),
        };
        if key.nick.is_empty() {
            return Err(format!("user entry '{raw}' has no nick"));
        }
        Ok(key)
    }
}

/// A time-boxed mute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutedUser {
    #[serde(default = "any_platform")]
    pub platform: String,
    pub nick: String,
    /// Epoch millis after which the mute no longer applies.
    pub mute_expiry: i64,
}

fn any_platform() -> String {
    ANY_PLATFORM.to_string()
}

impl MutedUser {
    pub fn key(&self) -> UserKey {
        UserKey::new(&self.platform, &self.nick)
    }

    pub fn is_active(&self, now_ms: i64) -> bool {
        self.mute_expiry > now_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    pub version: u64,
    /// Empty means unfiltered channel browsing.
    pub terms: Vec<String>,
    pub show_nsfw: bool,
    pub show_nsfl: bool,
    pub banned_terms: BTreeSet<String>,
    pub banned_users: BTreeSet<UserKey>,
    pub trusted_users: BTreeSet<UserKey>,
    pub banned_links: BTreeSet<String>,
    pub banned_messages: BTreeSet<String>,
    pub muted_users: Vec<MutedUser>,
    /// Keyed by [`LinkKind::platform`](crate::classify::LinkKind::platform).
    pub platform_display: BTreeMap<String, DisplayMode>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            terms: Vec::new(),
            show_nsfw: false,
            show_nsfl: false,
            banned_terms: BTreeSet::new(),
            banned_users: BTreeSet::new(),
            trusted_users: BTreeSet::new(),
            banned_links: BTreeSet::new(),
            banned_messages: BTreeSet::new(),
            muted_users: Vec::new(),
            platform_display: BTreeMap::new(),
        }
    }
}

impl FilterSettings {
    /// Parse settings JSON of any known version.
    pub fn from_json(raw: &str, now_ms: i64) -> Result<Self, SettingsError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::migrate(value, now_ms)
    }

    /// Upgrade an arbitrary older shape to the current one, then sweep expired
    /// mutes.
    pub fn migrate(value: Value, now_ms: i64) -> Result<Self, SettingsError> {
        let mut obj = match value {
            Value::Object(obj) => obj,
            other => return Err(SettingsError::Shape(json_kind(&other))),
        };

        let from_version = obj.get("version").and_then(Value::as_u64).unwrap_or(1);
        if from_version > SETTINGS_VERSION {
            warn!(version = from_version, "Settings written by a newer version, loading best-effort");
        }

        migrate_terms(&mut obj);
        rename_legacy_bool(&mut obj, "nsfw", "showNsfw");
        rename_legacy_bool(&mut obj, "nsfl", "showNsfl");
        for key in ["bannedTerms", "bannedLinks", "bannedMessages"] {
            coerce_string_list(&mut obj, key);
        }
        for key in ["bannedUsers", "trustedUsers"] {
            migrate_user_list(&mut obj, key);
        }
        migrate_mutes(&mut obj);
        obj.insert("version".into(), Value::from(SETTINGS_VERSION));

        let mut settings: FilterSettings = serde_json::from_value(Value::Object(obj))?;
        settings.normalize();
        settings.sweep_expired(now_ms);
        Ok(settings)
    }

    /// Serialize for persistence, sweeping expired mutes first.
    pub fn to_json(&mut self, now_ms: i64) -> Result<String, SettingsError> {
        self.sweep_expired(now_ms);
        self.version = SETTINGS_VERSION;
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn normalize(&mut self) {
        self.terms = normalize_terms(&self.terms);
        self.banned_terms = std::mem::take(&mut self.banned_terms)
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.banned_links = std::mem::take(&mut self.banned_links)
            .into_iter()
            .map(|l| normalize_link(&l))
            .filter(|l| !l.is_empty())
            .collect();
    }

    /// Drop mutes whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&mut self, now_ms: i64) -> usize {
        let before = self.muted_users.len();
        self.muted_users.retain(|m| m.is_active(now_ms));
        before - self.muted_users.len()
    }

    pub fn is_banned_user(&self, platform: &str, nick: &str) -> bool {
        self.banned_users.iter().any(|k| k.matches(platform, nick))
    }

    pub fn is_trusted_user(&self, platform: &str, nick: &str) -> bool {
        self.trusted_users.iter().any(|k| k.matches(platform, nick))
    }

    /// Expired mutes count as absent even before a sweep.
    pub fn is_muted(&self, platform: &str, nick: &str, now_ms: i64) -> bool {
        self.muted_users
            .iter()
            .any(|m| m.is_active(now_ms) && m.key().matches(platform, nick))
    }

    pub fn is_banned_link(&self, url: &str) -> bool {
        self.banned_links.contains(&normalize_link(url))
    }

    pub fn display_mode(&self, platform_key: &str) -> DisplayMode {
        self.platform_display
            .get(platform_key)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_terms(&mut self, terms: &[String]) {
        self.terms = normalize_terms(terms);
    }

    pub fn ban_user(&mut self, platform: &str, nick: &str) {
        let key = UserKey::new(platform, nick);
        self.trusted_users.remove(&key);
        self.banned_users.insert(key);
    }

    pub fn trust_user(&mut self, platform: &str, nick: &str) {
        let key = UserKey::new(platform, nick);
        self.banned_users.remove(&key);
        self.trusted_users.insert(key);
    }

    /// Mute until `until_ms`, replacing an existing mute for the same user.
    pub fn mute_user(&mut self, platform: &str, nick: &str, until_ms: i64) {
        let key = UserKey::new(platform, nick);
        self.muted_users.retain(|m| m.key() != key);
        self.muted_users.push(MutedUser {
            platform: key.platform,
            nick: key.nick,
            mute_expiry: until_ms,
        });
    }

    pub fn ban_link(&mut self, url: &str) {
        let normalized = normalize_link(url);
        if !normalized.is_empty() {
            self.banned_links.insert(normalized);
        }
    }

    pub fn ban_message(&mut self, message_id: &str) {
        self.banned_messages.insert(message_id.to_string());
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn split_list(raw: &str) -> Vec<Value> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
        .collect()
}

/// `terms: "a, b"` and legacy `username: "a"` become a term list.
fn migrate_terms(obj: &mut Map<String, Value>) {
    let username = obj.remove("username");
    match obj.get("terms") {
        Some(Value::String(s)) => {
            let list = split_list(s);
            obj.insert("terms".into(), Value::Array(list));
        }
        Some(Value::Array(_)) => {}
        _ => {
            let list = match username {
                Some(Value::String(name)) if !name.trim().is_empty() => {
                    vec![Value::String(name.trim().to_string())]
                }
                _ => Vec::new(),
            };
            obj.insert("terms".into(), Value::Array(list));
        }
    }
}

fn rename_legacy_bool(obj: &mut Map<String, Value>, legacy: &str, current: &str) {
    if let Some(value) = obj.remove(legacy) {
        if !obj.contains_key(current) && value.is_boolean() {
            obj.insert(current.to_string(), value);
        }
    }
}

fn coerce_string_list(obj: &mut Map<String, Value>, key: &str) {
    let list = match obj.remove(key) {
        Some(Value::String(s)) => split_list(&s),
        Some(Value::Array(items)) => items.into_iter().filter(Value::is_string).collect(),
        _ => Vec::new(),
    };
    obj.insert(key.to_string(), Value::Array(list));
}

/// Users may be stored as `"platform:nick"`, a bare `"nick"`, or an object
/// with `platform` and `nick` fields.
fn migrate_user_list(obj: &mut Map<String, Value>, key: &str) {
    let items = match obj.remove(key) {
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => split_list(&s),
        _ => Vec::new(),
    };
    let list = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(Value::String(s)),
            Value::Object(o) => {
                let nick = o.get("nick").and_then(Value::as_str)?;
                let platform = o.get("platform").and_then(Value::as_str).unwrap_or(ANY_PLATFORM);
                Some(Value::String(format!("{platform}:{nick}")))
            }
            other => {
                debug!(entry = %other, list = key, "Dropping unreadable user entry");
                None
            }
        })
        .collect();
    obj.insert(key.to_string(), Value::Array(list));
}

/// Mutes without an expiry cannot be honoured and are dropped.
fn migrate_mutes(obj: &mut Map<String, Value>) {
    let items = match obj.remove("mutedUsers") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let list = items
        .into_iter()
        .filter(|item| {
            item.get("nick").is_some_and(Value::is_string)
                && item.get("muteExpiry").is_some_and(Value::is_i64)
        })
        .collect();
    obj.insert("mutedUsers".into(), Value::Array(list));
}
