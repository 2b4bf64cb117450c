//! Ingestion: fetch sources and merge new items into their logs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::db::Database;
use crate::feed::fetcher::FeedSource;
use crate::feed::locks::KeyedLocks;
use crate::feed::registry::SourceRegistry;
use crate::feed::store::ItemLogStore;
use crate::feed::types::{sort_newest_first, FeedItem};
use crate::{Result, VaultError};

/// Result of ingesting one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New items prepended to the log (possibly zero).
    Inserted(usize),
    /// Retrieval failed; the log was left untouched.
    Skipped(String),
}

/// Per-source outcomes of one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub outcomes: BTreeMap<String, IngestOutcome>,
}

impl IngestReport {
    /// Total number of items prepended across all sources.
    pub fn inserted_total(&self) -> usize {
        self.outcomes
            .values()
            .map(|o| match o {
                IngestOutcome::Inserted(n) => *n,
                IngestOutcome::Skipped(_) => 0,
            })
            .sum()
    }

    /// Identifiers whose retrieval failed.
    pub fn skipped(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IngestOutcome::Skipped(_)))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&IngestOutcome> {
        self.outcomes.get(id)
    }
}

/// Fetches sources and prepends their new items.
///
/// Cloning is cheap; clones share the database and the per-source locks.
#[derive(Clone)]
pub struct Ingestor {
    db: Arc<Database>,
    source: Arc<dyn FeedSource>,
    locks: KeyedLocks,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, source: Arc<dyn FeedSource>, config: &IngestConfig) -> Self {
        Self {
            db,
            source,
            locks: KeyedLocks::new(),
            concurrency: config.concurrency.max(1),
            deadline: (config.deadline_secs > 0).then(|| Duration::from_secs(config.deadline_secs)),
        }
    }

    /// Override the deadline for a whole [`Ingestor::ingest`] call.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Locks serializing mutations of each source's log.
    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Ingest the given sources, or every registered source when `ids` is empty.
    ///
    /// Retrieval failures are recorded as skipped and never stop sibling
    /// sources. Any other failure is returned once every source has finished.
    pub async fn ingest(&self, ids: &[String]) -> Result<IngestReport> {
        let registry = SourceRegistry::new(&self.db);
        let targets: Vec<(String, bool)> = if ids.is_empty() {
            registry
                .list_all()
                .await?
                .into_iter()
                .map(|id| (id, true))
                .collect()
        } else {
            let mut seen = HashSet::new();
            let mut targets = Vec::new();
            for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
                targets.push((id.clone(), registry.contains(id).await?));
            }
            targets
        };

        if targets.is_empty() {
            debug!("No sources to ingest");
            return Ok(IngestReport::default());
        }

        let run = self.ingest_all(targets);
        let results = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, run)
                .await
                .map_err(|_| VaultError::Timeout(deadline))?,
            None => run.await,
        };

        let mut report = IngestReport::default();
        let mut fatal = None;
        for (id, result) in results {
            let outcome = match result {
                Ok(inserted) => IngestOutcome::Inserted(inserted),
                Err(e) if e.is_transient_source() => {
                    warn!(source_id = %id, "Skipping source: {}", e);
                    IngestOutcome::Skipped(e.to_string())
                }
                Err(e) => {
                    warn!(source_id = %id, "Ingestion failed: {}", e);
                    fatal.get_or_insert(e);
                    continue;
                }
            };
            report.outcomes.insert(id, outcome);
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            "Ingested {} source(s): {} new item(s), {} skipped",
            report.outcomes.len(),
            report.inserted_total(),
            report.skipped().len()
        );
        Ok(report)
    }

    async fn ingest_all(&self, targets: Vec<(String, bool)>) -> Vec<(String, Result<usize>)> {
        stream::iter(targets)
            .map(|(id, registered)| async move {
                let result = self.refresh(&id, registered).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Fetch one source and prepend the items newer than its head.
    ///
    /// Returns the number of items inserted.
    pub async fn ingest_source(&self, id: &str) -> Result<usize> {
        self.refresh(id, false).await
    }

    /// Like [`Ingestor::ingest_source`] for a registered source. Nothing is
    /// written if the source is removed while its fetch is in flight.
    pub async fn ingest_registered(&self, id: &str) -> Result<usize> {
        self.refresh(id, true).await
    }

    /// First refresh of a just-registered source.
    ///
    /// The source's lock is held across the fetch, so readers that take the
    /// same lock see the initial items.
    pub async fn ingest_new(&self, id: &str) -> Result<usize> {
        let _guard = self.locks.lock(id).await;
        let batch = self.fetch_sorted(id).await?;
        self.merge(id, &batch, true).await
    }

    async fn refresh(&self, id: &str, registered: bool) -> Result<usize> {
        let batch = self.fetch_sorted(id).await?;
        let _guard = self.locks.lock(id).await;
        self.merge(id, &batch, registered).await
    }

    async fn fetch_sorted(&self, id: &str) -> Result<Vec<FeedItem>> {
        let mut batch = self.source.fetch(id).await?;
        sort_newest_first(&mut batch);
        Ok(batch)
    }

    /// Prepend the new part of `batch`. The caller holds the lock for `id`.
    async fn merge(&self, id: &str, batch: &[FeedItem], registered: bool) -> Result<usize> {
        if registered && !SourceRegistry::new(&self.db).contains(id).await? {
            debug!(
                "Source {} was removed during retrieval, dropping {} item(s)",
                id,
                batch.len()
            );
            return Ok(0);
        }

        let store = ItemLogStore::new(&self.db);
        let head = store.head(id).await?;
        let fresh = select_new(batch, head.as_ref());

        store.prepend(id, fresh).await?;
        debug!(
            "Source {}: {} fetched, {} new",
            id,
            batch.len(),
            fresh.len()
        );
        Ok(fresh.len())
    }
}

/// The leading run of a newest-first batch that is strictly newer than `head`.
///
/// Scanning stops at the first item not newer than the head, so older
/// items that were never stored are not picked up.
pub fn select_new<'a>(sorted: &'a [FeedItem], head: Option<&FeedItem>) -> &'a [FeedItem] {
    let Some(head) = head else {
        return sorted;
    };
    let cut = sorted
        .iter()
        .position(|item| item.published_at <= head.published_at)
        .unwrap_or(sorted.len());
    &sorted[..cut]
}
