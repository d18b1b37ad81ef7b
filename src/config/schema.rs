//! `linkwall.toml` schema.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Data directory name used by `directories` for the default settings path.
pub const APP_DIR_NAME: &str = "linkwall";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourcesConfig {
    #[serde(default)]
    pub mentions: HttpSourceConfig,
    #[serde(default)]
    pub fallback: HttpSourceConfig,
    #[serde(default)]
    pub live: Vec<LiveSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    /// Platform stamped on messages that do not carry one.
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Bounded wait for a live source's initial history burst.
    #[serde(default = "default_history_wait_secs")]
    pub history_wait_secs: u64,
    /// Load more when the last visible card is within this many cards of the end.
    #[serde(default = "default_load_more_threshold")]
    pub load_more_threshold: usize,
    #[serde(default = "default_card_cache_capacity")]
    pub card_cache_capacity: usize,
    /// Used only when the settings file has no terms yet.
    #[serde(default)]
    pub initial_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    #[serde(default = "default_min_column_width")]
    pub min_column_width: u32,
    #[serde(default = "default_max_columns")]
    pub max_columns: usize,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsConfig {
    /// FilterSettings JSON file. Defaults to the platform data dir.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            platform: default_platform(),
            channel: default_channel(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            history_wait_secs: default_history_wait_secs(),
            load_more_threshold: default_load_more_threshold(),
            card_cache_capacity: default_card_cache_capacity(),
            initial_terms: Vec::new(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_column_width: default_min_column_width(),
            max_columns: default_max_columns(),
            viewport_width: default_viewport_width(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_platform() -> String {
    "dgg".to_string()
}

fn default_channel() -> String {
    "destinygg".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_page_size() -> usize {
    50
}

fn default_history_wait_secs() -> u64 {
    5
}

fn default_load_more_threshold() -> usize {
    10
}

fn default_card_cache_capacity() -> usize {
    linkwall_core::card::DEFAULT_CARD_CACHE_CAPACITY
}

fn default_min_column_width() -> u32 {
    320
}

fn default_max_columns() -> usize {
    6
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_bind_address() -> String {
    "127.0.0.1:3850".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HttpSourceConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.base_url.is_empty()
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML config")
    }

    pub fn validate(&self) -> Result<()> {
        for (name, source) in [("mentions", &self.sources.mentions), ("fallback", &self.sources.fallback)] {
            if source.is_active()
                && !source.base_url.starts_with("http://")
                && !source.base_url.starts_with("https://")
            {
                anyhow::bail!("{name} base_url must start with http:// or https://");
            }
        }

        for live in &self.sources.live {
            if !live.url.starts_with("ws://") && !live.url.starts_with("wss://") {
                anyhow::bail!("Live source '{}' URL must start with ws:// or wss://", live.name);
            }
        }

        if !self.sources.mentions.is_active() && !self.sources.fallback.is_active() && self.sources.live.is_empty() {
            anyhow::bail!("At least one source must be configured");
        }

        if self.feed.page_size == 0 {
            anyhow::bail!("feed.page_size must be at least 1");
        }
        if self.layout.min_column_width == 0 || self.layout.max_columns == 0 {
            anyhow::bail!("layout.min_column_width and layout.max_columns must be positive");
        }

        if self.api.bind.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("Invalid bind address: {}", self.api.bind);
        }

        Ok(())
    }

    /// Where FilterSettings live: the configured path with `~` expanded, or
    /// `<data dir>/linkwall/settings.json`.
    pub fn settings_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.settings.path {
            return Ok(PathBuf::from(shellexpand::tilde(path).as_ref()));
        }
        let dirs = directories::ProjectDirs::from("", "", APP_DIR_NAME)
            .context("Could not determine a data directory for settings")?;
        Ok(dirs.data_dir().join("settings.json"))
    }
}

/// Load `path`, or fall back to defaults when the default path is absent.
pub fn load_or_default(path: &str, is_default_path: bool) -> Result<Config> {
    let expanded = shellexpand::tilde(path);
    if is_default_path && !Path::new(expanded.as_ref()).exists() {
        return Ok(Config::default());
    }
    Config::load_from_file(path)
}
