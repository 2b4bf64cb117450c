//! Source registry: the set of known feed identifiers.

use tracing::debug;

use crate::db::{with_retry, Database};
use crate::Result;

/// Repository for the set of registered sources.
pub struct SourceRegistry<'a> {
    db: &'a Database,
}

impl<'a> SourceRegistry<'a> {
    /// Create a new registry view over the given database.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add one identifier.
    ///
    /// Returns 1 if it was newly added, 0 if it was already present.
    pub async fn add_one(&self, id: &str) -> Result<u64> {
        let pool = self.db.pool();
        let result = with_retry(self.db.retry_policy(), "add source", move || {
            sqlx::query("INSERT OR IGNORE INTO sources (id) VALUES (?)")
                .bind(id)
                .execute(pool)
        })
        .await?;

        Ok(result.rows_affected())
    }

    /// Add several identifiers in one transaction.
    ///
    /// Returns how many were not already present. An identifier repeated
    /// within `ids` counts once.
    pub async fn add_many(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool();
        let added = with_retry(self.db.retry_policy(), "add sources", move || async move {
            let mut tx = pool.begin().await?;
            let mut added = 0;
            for id in ids {
                added += sqlx::query("INSERT OR IGNORE INTO sources (id) VALUES (?)")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(added)
        })
        .await?;

        debug!("Registered {} of {} source(s)", added, ids.len());
        Ok(added)
    }

    /// Check whether an identifier is registered.
    pub async fn contains(&self, id: &str) -> Result<bool> {
        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "check source", move || {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM sources WHERE id = ?)")
                .bind(id)
                .fetch_one(pool)
        })
        .await
    }

    /// Snapshot of every registered identifier, in no particular order.
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "list sources", move || {
            sqlx::query_scalar::<_, String>("SELECT id FROM sources").fetch_all(pool)
        })
        .await
    }

    /// Number of registered identifiers.
    pub async fn count(&self) -> Result<i64> {
        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "count sources", move || {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sources").fetch_one(pool)
        })
        .await
    }

    /// Remove identifiers together with their item logs.
    ///
    /// Returns how many identifiers were actually registered. Unknown ids
    /// contribute 0.
    pub async fn remove_many(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool();
        let removed = with_retry(self.db.retry_policy(), "remove sources", move || async move {
            let mut tx = pool.begin().await?;
            let mut removed = 0;
            for id in ids {
                removed += sqlx::query("DELETE FROM sources WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                sqlx::query("DELETE FROM item_logs WHERE source_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(removed)
        })
        .await?;

        debug!("Removed {} of {} source(s)", removed, ids.len());
        Ok(removed)
    }
}
