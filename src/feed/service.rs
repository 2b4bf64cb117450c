//! Feed service: the caller-facing operations.
//!
//! `FeedService` wires the registry, store, ingestor, query engine and
//! subscription coordinator around one shared [`Database`].

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::feed::fetcher::FeedSource;
use crate::feed::ingest::{IngestReport, Ingestor};
use crate::feed::query::{GetManyRequest, GetOneRequest, QueryEngine, StoryStream};
use crate::feed::registry::SourceRegistry;
use crate::feed::subscribe::SubscriptionCoordinator;
use crate::feed::types::{validate_source_id, Overview, OVERVIEW_STORIES_TOTAL};
use crate::Result;

/// Service for feed operations.
pub struct FeedService {
    db: Arc<Database>,
    ingestor: Ingestor,
    query: QueryEngine,
    coordinator: SubscriptionCoordinator,
}

impl FeedService {
    /// Create a new FeedService.
    pub fn new(db: Arc<Database>, source: Arc<dyn FeedSource>, config: &Config) -> Self {
        let ingestor = Ingestor::new(db.clone(), source, &config.ingest);
        let query = QueryEngine::new(db.clone(), &config.query);
        let coordinator = SubscriptionCoordinator::new(
            db.clone(),
            ingestor.clone(),
            query.format().clone(),
            &config.subscribe,
        );

        Self {
            db,
            ingestor,
            query,
            coordinator,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The ingestor, shared with background refresh.
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Register one source. Returns 1 if it is new, 0 otherwise.
    pub async fn add_source(&self, id: &str) -> Result<u64> {
        validate_source_id(id)?;
        SourceRegistry::new(&self.db).add_one(id).await
    }

    /// Register several sources. Returns how many were new.
    pub async fn add_sources(&self, ids: &[String]) -> Result<u64> {
        for id in ids {
            validate_source_id(id)?;
        }
        SourceRegistry::new(&self.db).add_many(ids).await
    }

    /// Stream a snapshot of the registered sources.
    pub async fn list_sources(&self) -> Result<BoxStream<'static, Result<String>>> {
        let ids = SourceRegistry::new(&self.db).list_all().await?;
        Ok(stream::iter(ids.into_iter().map(Ok)).boxed())
    }

    /// Remove the streamed sources and their logs.
    ///
    /// The whole input is read and validated before anything is removed.
    /// Returns how many of the identifiers were registered.
    pub async fn delete_sources<S>(&self, ids: S) -> Result<u64>
    where
        S: Stream<Item = String> + Send,
    {
        let ids: Vec<String> = ids.collect().await;
        for id in &ids {
            validate_source_id(id)?;
        }
        // Sorted so concurrent deletes take the locks in the same order.
        let ids: Vec<String> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.ingestor.locks().lock(id).await);
        }
        let removed = SourceRegistry::new(&self.db).remove_many(&ids).await?;
        drop(guards);

        info!("Deleted {} source(s)", removed);
        Ok(removed)
    }

    /// Refresh the given sources, or all of them when `ids` is empty.
    pub async fn ingest(&self, ids: &[String]) -> Result<IngestReport> {
        for id in ids {
            validate_source_id(id)?;
        }
        self.ingestor.ingest(ids).await
    }

    pub async fn get_one(&self, request: GetOneRequest) -> Result<StoryStream> {
        self.query.get_one(request).await
    }

    pub async fn get_many(&self, request: GetManyRequest) -> Result<StoryStream> {
        self.query.get_many(request).await
    }

    /// Register, refresh if new, and stream back each incoming source.
    pub fn subscribe_and_refresh<S>(&self, ids: S) -> StoryStream
    where
        S: Stream<Item = String> + Send + 'static,
    {
        self.coordinator.subscribe_and_refresh(ids)
    }

    /// Every registered source with its latest stories, newest first.
    pub async fn overview(&self) -> Result<Overview> {
        let mut source_ids = SourceRegistry::new(&self.db).list_all().await?;
        source_ids.sort();

        let request = GetManyRequest {
            source_ids: source_ids.clone(),
            total_count: Some(OVERVIEW_STORIES_TOTAL),
            ..GetManyRequest::default()
        };
        let mut stories: Vec<_> = self.query.get_many(request).await?.try_collect().await?;
        stories.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        Ok(Overview {
            source_ids,
            stories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::FeedItem;
    use crate::VaultError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    /// Serves two items per source, an hour apart, keyed off the id length.
    struct EchoSource;

    #[async_trait]
    impl FeedSource for EchoSource {
        async fn fetch(&self, id: &str) -> Result<Vec<FeedItem>> {
            let hour = |h: u32| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
            let base = id.len() as u32;
            Ok(vec![
                FeedItem::new(format!("{id}-old"), hour(base)),
                FeedItem::new(format!("{id}-new"), hour(base + 1)),
            ])
        }
    }

    async fn service() -> FeedService {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        FeedService::new(db, Arc::new(EchoSource), &Config::default())
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_source_rejects_blank() {
        let service = service().await;
        assert!(matches!(
            service.add_source("  ").await,
            Err(VaultError::Validation(_))
        ));
        assert!(service.add_sources(&ids(&["a", ""])).await.is_err());
        let listed: Vec<_> = service.list_sources().await.unwrap().collect().await;
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_list_sources() {
        let service = service().await;
        service.add_sources(&ids(&["b", "a"])).await.unwrap();

        let mut listed: Vec<String> = service
            .list_sources()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        listed.sort();
        assert_eq!(listed, ids(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_delete_sources_stream() {
        let service = service().await;
        service.add_sources(&ids(&["a", "b"])).await.unwrap();
        service.ingest(&[]).await.unwrap();

        let removed = service
            .delete_sources(stream::iter(ids(&["a", "a", "zz"])))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let stories: Vec<_> = service
            .get_one(GetOneRequest::all("a"))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(stories.is_empty());
        assert!(service.ingestor().locks().is_empty());
    }

    #[tokio::test]
    async fn test_overview_sorted_newest_first() {
        let service = service().await;
        service.add_sources(&ids(&["a", "bbb"])).await.unwrap();
        service.ingest(&[]).await.unwrap();

        let overview = service.overview().await.unwrap();
        assert_eq!(overview.source_ids, ids(&["a", "bbb"]));
        let titles: Vec<_> = overview.stories.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["bbb-new", "bbb-old", "a-new", "a-old"]);
    }

    #[tokio::test]
    async fn test_overview_empty() {
        let service = service().await;
        let overview = service.overview().await.unwrap();
        assert!(overview.source_ids.is_empty());
        assert!(overview.stories.is_empty());
    }
}
