//! HTTP surface over a running [`crate::feed::Feed`].

pub mod api;

pub use api::{router, ApiServer};
