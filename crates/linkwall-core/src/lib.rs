//! Feed aggregation core for linkwall.
//!
//! Pure, synchronous building blocks: the message model, the merge and dedup
//! store, pagination and fallback policy, filter settings, the filter pipeline,
//! link classification with cached card projection, and the incremental
//! masonry layout. The async runtime and every network source live in the
//! `linkwall` application crate.

pub mod card;
pub mod classify;
pub mod cursor;
pub mod filter;
pub mod layout;
pub mod mention;
pub mod message;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use card::{card_id, CacheStats, CardCache, CardOwner, LinkCard};
pub use classify::{
    classify_url, extract_urls, normalize_link, resolve_redirects, Classified, LinkKind, MediaKind,
};
pub use cursor::{CursorManager, FetchPlan, PaginationCursor, PrimaryOutcome};
pub use filter::{FilterPipeline, HiddenReason, Verdict};
pub use layout::{column_count_for_width, redistribute, LayoutChange, MasonryLayout};
pub use mention::{normalize_term, normalize_terms, TermMatcher};
pub use message::{message_id, KickEmote, Message};
pub use settings::{DisplayMode, FilterSettings, MutedUser, SettingsError, UserKey};
pub use store::{MergeOutcome, MergeStore};
