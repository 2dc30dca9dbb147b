pub mod api;
pub mod backfill;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod mirror;
pub mod models;
pub mod payload;
pub mod report;
pub mod storage;
pub mod sync;
