//! Per-source item logs, newest first.
//!
//! A log is an ordered list of serialized items keyed by source id.
//! Rows carry an increasing `seq`; index 0 is the row with the highest
//! `seq`, so prepending is an append of higher sequence numbers.

use crate::db::{with_retry, Database};
use crate::feed::codec;
use crate::feed::types::FeedItem;
use crate::{Result, VaultError};

/// Repository for per-source item logs.
pub struct ItemLogStore<'a> {
    db: &'a Database,
}

impl<'a> ItemLogStore<'a> {
    /// Create a new store view over the given database.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Most recent stored item, or `None` when the log is absent or empty.
    pub async fn head(&self, id: &str) -> Result<Option<FeedItem>> {
        let pool = self.db.pool();
        let payload = with_retry(self.db.retry_policy(), "read head", move || {
            sqlx::query_scalar::<_, Vec<u8>>(
                "SELECT payload FROM item_logs WHERE source_id = ? ORDER BY seq DESC LIMIT 1",
            )
            .bind(id)
            .fetch_optional(pool)
        })
        .await?;

        payload.map(|p| codec::decode(&p)).transpose()
    }

    /// Insert items at the front of the log.
    ///
    /// `items` must be newest-first and every item must be strictly newer
    /// than the current head; otherwise nothing is written and a validation
    /// error is returned.
    pub async fn prepend(&self, id: &str, items: &[FeedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        if items
            .windows(2)
            .any(|pair| pair[0].published_at < pair[1].published_at)
        {
            return Err(VaultError::Validation(format!(
                "items for {id} are not newest-first"
            )));
        }

        let payloads = items
            .iter()
            .map(codec::encode)
            .collect::<Result<Vec<_>>>()?;
        // Oldest item gets the lowest new seq so the newest ends up at index 0.
        let oldest_first: Vec<&[u8]> = payloads.iter().rev().map(Vec::as_slice).collect();
        let oldest = &items[items.len() - 1];

        let pool = self.db.pool();
        let oldest_first = &oldest_first;
        let written = with_retry(self.db.retry_policy(), "prepend items", move || async move {
            let mut tx = pool.begin().await?;

            let head: Option<(i64, Vec<u8>)> = sqlx::query_as(
                "SELECT seq, payload FROM item_logs WHERE source_id = ? ORDER BY seq DESC LIMIT 1",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

            let next_seq = match head {
                Some((seq, payload)) => {
                    // A corrupt head cannot be compared against; refuse the write.
                    let Ok(current) = codec::decode(&payload) else {
                        return Ok(Err(VaultError::Codec(format!(
                            "head of {id} cannot be decoded"
                        ))));
                    };
                    if oldest.published_at <= current.published_at {
                        return Ok(Err(VaultError::Validation(format!(
                            "prepend to {id} is not newer than the current head"
                        ))));
                    }
                    seq + 1
                }
                None => 1,
            };

            for (offset, payload) in oldest_first.iter().enumerate() {
                sqlx::query("INSERT INTO item_logs (source_id, seq, payload) VALUES (?, ?, ?)")
                    .bind(id)
                    .bind(next_seq + offset as i64)
                    .bind(*payload)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok::<_, sqlx::Error>(Ok(()))
        })
        .await?;

        written
    }

    /// Raw payloads for the inclusive index range `start..=end`.
    ///
    /// Negative indices count from the tail, so `end = -1` reads through the
    /// last item. A range past the end of the log yields what exists.
    pub async fn range_read_raw(&self, id: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        let (start, end) = if start < 0 || end < 0 {
            let len = self.len(id).await?;
            (resolve_index(start, len), resolve_index(end, len))
        } else {
            (start, end)
        };

        let start = start.max(0);
        if end < start {
            return Ok(Vec::new());
        }
        let limit = end - start + 1;

        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "read range", move || {
            sqlx::query_scalar::<_, Vec<u8>>(
                "SELECT payload FROM item_logs WHERE source_id = ?
                 ORDER BY seq DESC LIMIT ? OFFSET ?",
            )
            .bind(id)
            .bind(limit)
            .bind(start)
            .fetch_all(pool)
        })
        .await
    }

    /// Decoded items for the inclusive index range `start..=end`.
    pub async fn range_read(&self, id: &str, start: i64, end: i64) -> Result<Vec<FeedItem>> {
        self.range_read_raw(id, start, end)
            .await?
            .iter()
            .map(|p| codec::decode(p))
            .collect()
    }

    /// Number of items in the log.
    pub async fn len(&self, id: &str) -> Result<i64> {
        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "count items", move || {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM item_logs WHERE source_id = ?")
                .bind(id)
                .fetch_one(pool)
        })
        .await
    }

    /// Whether a log exists for the source.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "check log", move || {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM item_logs WHERE source_id = ?)",
            )
            .bind(id)
            .fetch_one(pool)
        })
        .await
    }

    /// Delete the logs of every given source. Returns the number of items removed.
    pub async fn delete_all(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let pool = self.db.pool();
        with_retry(self.db.retry_policy(), "delete logs", move || async move {
            let mut tx = pool.begin().await?;
            let mut removed = 0;
            for id in ids {
                removed += sqlx::query("DELETE FROM item_logs WHERE source_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(removed)
        })
        .await
    }
}

/// Map a possibly negative index onto `0..len`.
fn resolve_index(index: i64, len: i64) -> i64 {
    if index < 0 {
        len + index
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn item(minute: u32) -> FeedItem {
        FeedItem::new(format!("item-{minute}"), at(minute))
    }

    fn titles(items: &[FeedItem]) -> Vec<String> {
        items.iter().map(|i| i.title.clone()).collect()
    }

    async fn seeded(db: &Database) -> ItemLogStore<'_> {
        let store = ItemLogStore::new(db);
        store
            .prepend("A", &[item(5), item(4), item(3), item(2), item(1)])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_head_absent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);
        assert!(store.head("A").await.unwrap().is_none());
        assert!(!store.exists("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_prepend_keeps_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);

        store.prepend("A", &[item(2), item(1)]).await.unwrap();
        store.prepend("A", &[item(4), item(3)]).await.unwrap();

        let all = store.range_read("A", 0, -1).await.unwrap();
        assert_eq!(titles(&all), ["item-4", "item-3", "item-2", "item-1"]);
        assert_eq!(store.head("A").await.unwrap().unwrap().title, "item-4");
        assert_eq!(store.len("A").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_prepend_rejects_unsorted_batch() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);

        let err = store.prepend("A", &[item(1), item(2)]).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert!(!store.exists("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_prepend_rejects_items_not_newer_than_head() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);
        store.prepend("A", &[item(5)]).await.unwrap();

        let err = store.prepend("A", &[item(6), item(5)]).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert_eq!(store.len("A").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prepend_empty_is_noop() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);
        store.prepend("A", &[]).await.unwrap();
        assert!(!store.exists("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_range_read_inclusive() {
        let db = Database::open_in_memory().await.unwrap();
        let store = seeded(&db).await;

        let slice = store.range_read("A", 1, 2).await.unwrap();
        assert_eq!(titles(&slice), ["item-4", "item-3"]);

        let first = store.range_read("A", 0, 0).await.unwrap();
        assert_eq!(titles(&first), ["item-5"]);
    }

    #[tokio::test]
    async fn test_range_read_past_end() {
        let db = Database::open_in_memory().await.unwrap();
        let store = seeded(&db).await;

        assert_eq!(store.range_read("A", 3, 100).await.unwrap().len(), 2);
        assert!(store.range_read("A", 10, 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_read_negative_indices() {
        let db = Database::open_in_memory().await.unwrap();
        let store = seeded(&db).await;

        let tail = store.range_read("A", -2, -1).await.unwrap();
        assert_eq!(titles(&tail), ["item-2", "item-1"]);
        assert!(store.range_read("A", 3, 1).await.unwrap().is_empty());
        assert_eq!(store.range_read("A", -100, -1).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_range_read_unknown_source() {
        let db = Database::open_in_memory().await.unwrap();
        let store = ItemLogStore::new(&db);
        assert!(store.range_read("nope", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logs_are_independent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = seeded(&db).await;
        store.prepend("B", &[item(1)]).await.unwrap();

        assert_eq!(store.len("A").await.unwrap(), 5);
        assert_eq!(store.len("B").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let db = Database::open_in_memory().await.unwrap();
        let store = seeded(&db).await;
        store.prepend("B", &[item(1)]).await.unwrap();

        let removed = store
            .delete_all(&["A".to_string(), "C".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 5);
        assert!(!store.exists("A").await.unwrap());
        assert!(store.exists("B").await.unwrap());
    }
}
