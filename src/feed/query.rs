//! Query engine: range, time window and keyword reads over item logs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::{KeywordPolicy, QueryConfig};
use crate::datetime::parse_time_bound;
use crate::db::Database;
use crate::feed::codec;
use crate::feed::store::ItemLogStore;
use crate::feed::types::{validate_source_id, Story, StoryFormat};
use crate::{Result, VaultError};

/// Buffered stories between producer tasks and the consumer.
const CHANNEL_CAPACITY: usize = 64;

/// A finite stream of stories; an `Err` item ends it.
pub type StoryStream = BoxStream<'static, Result<Story>>;

/// Turn a channel of results into a stream that stops after the first error.
pub(crate) fn channel_stream<T: Send + 'static>(
    rx: mpsc::Receiver<Result<T>>,
) -> BoxStream<'static, Result<T>> {
    stream::unfold((rx, false), |(mut rx, failed)| async move {
        if failed {
            return None;
        }
        let next = rx.recv().await?;
        let failed = next.is_err();
        Some((next, (rx, failed)))
    })
    .boxed()
}

/// Inclusive publish-time bounds of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// A window admitting every item.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(VaultError::Validation(format!(
                "time window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse caller-supplied bounds. Missing or blank bounds are open.
    pub fn parse(
        start: Option<&str>,
        end: Option<&str>,
        timezone: &str,
        format: &str,
    ) -> Result<Self> {
        let bound = |value: Option<&str>| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| parse_time_bound(v, timezone, format))
                .transpose()
        };
        let open = Self::unbounded();
        Self::new(
            bound(start)?.unwrap_or(open.start),
            bound(end)?.unwrap_or(open.end),
        )
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Space-separated title keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords(Vec<String>);

impl Keywords {
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_string).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// How many times an item with this title is emitted.
    ///
    /// Without keywords every item is emitted once.
    pub fn emissions(&self, title: &str, policy: KeywordPolicy) -> usize {
        if self.0.is_empty() {
            return 1;
        }
        let hits = self.0.iter().filter(|k| title.contains(k.as_str())).count();
        match policy {
            KeywordPolicy::PerKeyword => hits,
            KeywordPolicy::AnyKeyword => hits.min(1),
        }
    }
}

/// Read of one source's log.
#[derive(Debug, Clone)]
pub struct GetOneRequest {
    pub source_id: String,
    pub start_index: i64,
    /// Inclusive; `-1` reads through the end.
    pub end_index: i64,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub keywords: Option<String>,
}

impl GetOneRequest {
    /// Whole log, no filters.
    pub fn all(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            start_index: 0,
            end_index: -1,
            start_time: None,
            end_time: None,
            keywords: None,
        }
    }
}

/// Read across several sources.
#[derive(Debug, Clone, Default)]
pub struct GetManyRequest {
    pub source_ids: Vec<String>,
    /// Soft budget split across sources; `None` or 0 is unbounded.
    pub total_count: Option<u64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub keywords: Option<String>,
}

/// Serves stored items as stories.
#[derive(Clone)]
pub struct QueryEngine {
    db: Arc<Database>,
    format: Arc<StoryFormat>,
    policy: KeywordPolicy,
    deadline: Option<Duration>,
}

impl QueryEngine {
    pub fn new(db: Arc<Database>, config: &QueryConfig) -> Self {
        Self {
            db,
            format: Arc::new(StoryFormat {
                timezone: config.timezone.clone(),
                time_format: config.time_format.clone(),
            }),
            policy: config.keyword_policy,
            deadline: (config.deadline_secs > 0).then(|| Duration::from_secs(config.deadline_secs)),
        }
    }

    /// Override the deadline bounding [`QueryEngine::get_many`].
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn format(&self) -> &StoryFormat {
        &self.format
    }

    /// Parse window bounds in the configured timezone and format.
    pub fn window(&self, start: Option<&str>, end: Option<&str>) -> Result<TimeWindow> {
        TimeWindow::parse(start, end, &self.format.timezone, &self.format.time_format)
    }

    /// Stream the matching stories of one source.
    ///
    /// Caller input is checked before anything is read. An unknown source
    /// yields an empty stream.
    pub async fn get_one(&self, request: GetOneRequest) -> Result<StoryStream> {
        validate_source_id(&request.source_id)?;
        let window = self.window(request.start_time.as_deref(), request.end_time.as_deref())?;
        let keywords = Keywords::parse(request.keywords.as_deref().unwrap_or_default());

        let stories = self
            .scan(
                &request.source_id,
                request.start_index,
                request.end_index,
                &window,
                &keywords,
            )
            .await?;
        Ok(stream::iter(stories).boxed())
    }

    /// Stream matching stories from several sources.
    ///
    /// Sources are read concurrently; stories of one source stay in log
    /// order but sources interleave. The first failure ends the stream and
    /// cancels the remaining reads.
    pub async fn get_many(&self, request: GetManyRequest) -> Result<StoryStream> {
        for id in &request.source_ids {
            validate_source_id(id)?;
        }
        let window = self.window(request.start_time.as_deref(), request.end_time.as_deref())?;
        let keywords = Keywords::parse(request.keywords.as_deref().unwrap_or_default());
        let budgets = split_budget(request.total_count, request.source_ids.len());

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        for (id, budget) in request.source_ids.into_iter().zip(budgets) {
            let end = match budget {
                Some(0) => continue,
                Some(count) => i64::try_from(count - 1).unwrap_or(i64::MAX),
                None => -1,
            };
            let engine = self.clone();
            let keywords = keywords.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                for story in engine.scan(&id, 0, end, &window, &keywords).await? {
                    let story = story?;
                    if tx.send(Ok(story)).await.is_err() {
                        // Consumer went away.
                        break;
                    }
                }
                Ok::<_, VaultError>(())
            });
        }

        tokio::spawn(forward_failure(tasks, tx, self.deadline));
        Ok(channel_stream(rx))
    }

    /// Read and filter one log.
    ///
    /// A payload that cannot be decoded ends the result with its error,
    /// after the stories scanned before it.
    async fn scan(
        &self,
        id: &str,
        start: i64,
        end: i64,
        window: &TimeWindow,
        keywords: &Keywords,
    ) -> Result<Vec<Result<Story>>> {
        let payloads = ItemLogStore::new(&self.db)
            .range_read_raw(id, start, end)
            .await?;

        let mut stories = Vec::new();
        for payload in &payloads {
            let item = match codec::decode(payload) {
                Ok(item) => item,
                Err(e) => {
                    stories.push(Err(e));
                    break;
                }
            };
            if item.published_at > window.end {
                continue;
            }
            // Logs are newest-first: nothing further can be in the window.
            if item.published_at < window.start {
                break;
            }
            let story = Story::from_item(&item, &self.format);
            for _ in 0..keywords.emissions(&item.title, self.policy) {
                stories.push(Ok(story.clone()));
            }
        }

        debug!(
            "Scanned {} of {} item(s) from {}",
            stories.len(),
            payloads.len(),
            id
        );
        Ok(stories)
    }
}

/// Wait for every read; on failure or deadline, abort the rest and report it.
async fn forward_failure(
    mut tasks: JoinSet<Result<()>>,
    tx: mpsc::Sender<Result<Story>>,
    deadline: Option<Duration>,
) {
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, join_all(&mut tasks))
            .await
            .unwrap_or(Err(VaultError::Timeout(deadline))),
        None => join_all(&mut tasks).await,
    };

    if let Err(e) = outcome {
        tasks.abort_all();
        let _ = tx.send(Err(e)).await;
    }
}

async fn join_all(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }
    Ok(())
}

/// Split a total budget across `n` sources.
///
/// The first `total % n` sources get one extra. `None` means unbounded.
pub fn split_budget(total: Option<u64>, n: usize) -> Vec<Option<u64>> {
    let n64 = n as u64;
    match total {
        Some(total) if total > 0 && n > 0 => {
            let (base, extra) = (total / n64, total % n64);
            (0..n64)
                .map(|i| Some(base + u64::from(i < extra)))
                .collect()
        }
        _ => vec![None; n],
    }
}
