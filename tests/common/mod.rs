//! Test helpers for feedvault integration tests.
//!
//! Provides a scripted in-process feed source and builders for a service
//! backed by an in-memory or on-disk database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;

use feedvault::feed::FeedSource;
use feedvault::{Config, Database, FeedItem, FeedService, Result, StoryStream, VaultError};

/// A fixed point every test timestamp is relative to.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 5, 24, 0, 0, 0).unwrap()
}

/// An item published `minutes` after [`epoch`].
pub fn item(title: &str, minutes: i64) -> FeedItem {
    FeedItem::new(title, epoch() + chrono::Duration::minutes(minutes))
        .with_link(format!("https://example.com/{title}"))
}

/// A window bound `minutes` after [`epoch`], in the default query format.
pub fn bound(minutes: i64) -> Option<String> {
    Some(
        (epoch() + chrono::Duration::minutes(minutes))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    )
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Titles of every story, panicking on a stream error.
pub async fn titles(stream: StoryStream) -> Vec<String> {
    stream.map(|s| s.unwrap().title).collect().await
}

/// A feed source serving whatever the test scripted for each id.
///
/// Ids without a script fail like an unreachable host.
#[derive(Default)]
pub struct ScriptedSource {
    batches: Mutex<HashMap<String, Vec<FeedItem>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, id: &str, items: Vec<FeedItem>) {
        self.batches.lock().unwrap().insert(id.to_string(), items);
    }

    pub fn fail(&self, id: &str) {
        self.batches.lock().unwrap().remove(id);
    }

    /// Delay every fetch, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, source_id: &str) -> Result<Vec<FeedItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.batches
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .ok_or_else(|| VaultError::fetch_failed(source_id, "connection refused"))
    }
}

/// A service over an in-memory database.
pub async fn setup_service() -> (FeedService, Arc<ScriptedSource>) {
    setup_service_with(Config::default()).await
}

pub async fn setup_service_with(config: Config) -> (FeedService, Arc<ScriptedSource>) {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let source = ScriptedSource::new();
    (FeedService::new(db, source.clone(), &config), source)
}

/// A service over a database file, for tests that need several connections.
pub async fn setup_file_service(path: &Path) -> (FeedService, Arc<ScriptedSource>) {
    let db = Arc::new(Database::open(path).await.unwrap());
    let source = ScriptedSource::new();
    (FeedService::new(db, source.clone(), &Config::default()), source)
}
