//! Feed ingestion, storage and query.
//!
//! Sources are registered in the [`registry`], their items live in
//! newest-first logs in the [`store`], and the [`service`] exposes the
//! caller-facing operations on top of both.

pub mod codec;
pub mod fetcher;
pub mod ingest;
pub mod locks;
pub mod query;
pub mod refresher;
pub mod registry;
pub mod service;
pub mod store;
pub mod subscribe;
pub mod types;

pub use fetcher::{parse_feed, validate_url, FeedSource, HttpFeedSource};
pub use ingest::{select_new, IngestOutcome, IngestReport, Ingestor};
pub use locks::{KeyGuard, KeyedLocks};
pub use query::{
    split_budget, GetManyRequest, GetOneRequest, Keywords, QueryEngine, StoryStream, TimeWindow,
};
pub use refresher::Refresher;
pub use registry::SourceRegistry;
pub use service::FeedService;
pub use store::ItemLogStore;
pub use subscribe::SubscriptionCoordinator;
pub use types::{
    sort_newest_first, validate_source_id, FeedItem, Overview, Story, StoryFormat,
    MAX_SOURCE_ID_LENGTH, OVERVIEW_STORIES_TOTAL,
};
