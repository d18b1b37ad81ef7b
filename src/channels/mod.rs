//! Source adapters. Each one normalizes a foreign payload into
//! [`linkwall_core::Message`] and never filters or deduplicates.

pub mod fallback;
pub mod http;
pub mod live;
pub mod mentions;
pub mod traits;

pub use fallback::HttpFallbackSource;
pub use live::WsLiveSource;
pub use mentions::HttpMentionsSource;
pub use traits::{FallbackPage, FallbackSource, LiveEvent, LiveSource, MentionsSource, SourceError};
