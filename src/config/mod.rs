pub mod schema;
pub mod settings_store;

pub use schema::{
    load_or_default, ApiConfig, Config, FeedConfig, HttpSourceConfig, LayoutConfig, LiveSourceConfig,
    LoggingConfig, SettingsConfig, SourcesConfig,
};
pub use settings_store::SettingsStore;
