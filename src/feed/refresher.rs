//! Background refresh of every registered source.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::IngestConfig;
use crate::feed::ingest::Ingestor;

/// Shortest period the timer accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically ingests every registered source.
pub struct Refresher {
    ingestor: Ingestor,
    interval: Duration,
}

impl Refresher {
    pub fn new(ingestor: Ingestor, config: &IngestConfig) -> Self {
        Self::with_interval(ingestor, Duration::from_secs(config.refresh_interval_secs))
    }

    /// A zero `interval` is raised to the shortest supported period.
    pub fn with_interval(ingestor: Ingestor, interval: Duration) -> Self {
        Self {
            ingestor,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// The first refresh happens immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Refresher started (interval: {} seconds)",
            self.interval.as_secs()
        );

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => self.refresh().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Refresher stopped");
    }

    /// Spawn [`Refresher::run`] on the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn refresh(&self) {
        debug!("Refreshing all sources");
        match self.ingestor.ingest(&[]).await {
            Ok(report) => debug!(
                "Refresh done: {} new item(s) across {} source(s)",
                report.inserted_total(),
                report.outcomes.len()
            ),
            Err(e) => error!("Refresh failed: {}", e),
        }
    }
}
