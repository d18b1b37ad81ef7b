pub mod engine;

pub use engine::{now_ms, Feed, FeedOptions, FeedView, FetchStatus, SettingsPatch, Sources};
