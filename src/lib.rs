pub mod channels;
pub mod config;
pub mod feed;
pub mod gateway;
