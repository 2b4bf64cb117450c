//! Subscribe-and-refresh exchanges.
//!
//! The caller streams identifiers in; every identifier is registered,
//! refreshed if it was unknown, and its whole log is streamed back.

use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{FetchErrorPolicy, SubscribeConfig};
use crate::db::Database;
use crate::feed::ingest::Ingestor;
use crate::feed::query::{channel_stream, StoryStream};
use crate::feed::registry::SourceRegistry;
use crate::feed::store::ItemLogStore;
use crate::feed::types::{validate_source_id, Story, StoryFormat};
use crate::Result;

const CHANNEL_CAPACITY: usize = 64;

/// Serves subscribe-and-refresh exchanges.
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    db: Arc<Database>,
    ingestor: Ingestor,
    format: Arc<StoryFormat>,
    on_fetch_error: FetchErrorPolicy,
}

impl SubscriptionCoordinator {
    pub fn new(
        db: Arc<Database>,
        ingestor: Ingestor,
        format: StoryFormat,
        config: &SubscribeConfig,
    ) -> Self {
        Self {
            db,
            ingestor,
            format: Arc::new(format),
            on_fetch_error: config.on_fetch_error,
        }
    }

    /// Start an exchange over the incoming identifiers.
    ///
    /// Each identifier is served by its own task. Stories of one identifier
    /// arrive newest-first; identifiers interleave freely. The returned
    /// stream ends once the input has ended and every task has finished,
    /// or right after the first error.
    pub fn subscribe_and_refresh<S>(&self, ids: S) -> StoryStream
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.clone().drive(ids, tx));
        channel_stream(rx)
    }

    async fn drive<S>(self, ids: S, tx: mpsc::Sender<Result<Story>>)
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let mut ids = Box::pin(ids);
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut input_open = true;

        loop {
            tokio::select! {
                next = ids.next(), if input_open => match next {
                    Some(id) => {
                        let this = self.clone();
                        let tx = tx.clone();
                        tasks.spawn(async move { this.serve(id, tx).await });
                    }
                    None => {
                        debug!("Subscribe input closed, draining {} task(s)", tasks.len());
                        input_open = false;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let outcome = match joined {
                        Ok(result) => result,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = outcome {
                        tasks.abort_all();
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
                else => break,
            }
        }
    }

    async fn serve(&self, id: String, tx: mpsc::Sender<Result<Story>>) -> Result<()> {
        validate_source_id(&id)?;

        let added = SourceRegistry::new(&self.db).add_one(&id).await?;
        if added == 1 {
            match self.ingestor.ingest_new(&id).await {
                Ok(inserted) => debug!("Subscribed {} with {} item(s)", id, inserted),
                Err(e) if e.is_transient_source() && self.on_fetch_error == FetchErrorPolicy::Skip => {
                    warn!(source_id = %id, "Initial refresh failed: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        // Waits out an initial refresh started by another exchange.
        let items = {
            let _guard = self.ingestor.locks().lock(&id).await;
            ItemLogStore::new(&self.db).range_read(&id, 0, -1).await?
        };
        for item in &items {
            if tx.send(Ok(Story::from_item(item, &self.format))).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
