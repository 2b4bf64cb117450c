//! feedvault - feed ingestion, deduplication and query engine
//!
//! Feeds are fetched concurrently, merged into per-source newest-first
//! logs without duplicates, and served back through range, time window
//! and keyword queries.

pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;

pub use config::{Config, FetchErrorPolicy, KeywordPolicy};
pub use db::{Database, RetryPolicy};
pub use error::{Result, VaultError};
pub use feed::{
    FeedItem, FeedService, FeedSource, GetManyRequest, GetOneRequest, HttpFeedSource,
    IngestOutcome, IngestReport, Overview, Refresher, Story, StoryStream,
};
