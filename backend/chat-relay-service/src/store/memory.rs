use super::{Cursor, MessageStore, StoreError, StoreResult};
use crate::models::{Message, MessageId, PendingMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Faults {
    failing_inserts: usize,
    failing_queries: usize,
    partial_insert: Option<usize>,
}

/// In-process message log.
///
/// Not durable: used with `STORE_BACKEND=memory` for local runs and as the
/// store behind the test suites. Faults can be injected to exercise the
/// retry paths of the batch writer and change notifier.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<Message>>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls to `insert_many` without writing anything.
    pub fn fail_inserts(&self, count: usize) {
        self.faults.lock().failing_inserts = count;
    }

    /// Fail the next `count` read calls (`find_since`, `latest_id`, `recent`).
    pub fn fail_queries(&self, count: usize) {
        self.faults.lock().failing_queries = count;
    }

    /// On the next `insert_many`, persist only the first `rows` rows and then fail.
    pub fn fail_insert_after(&self, rows: usize) {
        self.faults.lock().partial_insert = Some(rows);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Every stored row in id order.
    pub async fn all(&self) -> Vec<Message> {
        self.rows.read().await.clone()
    }

    fn take_query_fault(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        if faults.failing_queries > 0 {
            faults.failing_queries -= 1;
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_many(&self, batch: &[PendingMessage]) -> StoreResult<u64> {
        let accepted = {
            let mut faults = self.faults.lock();
            if faults.failing_inserts > 0 {
                faults.failing_inserts -= 1;
                return Err(StoreError::Unavailable("injected insert failure".into()));
            }
            faults.partial_insert.take()
        };

        let mut rows = self.rows.write().await;
        let take = accepted.unwrap_or(batch.len()).min(batch.len());
        for pending in &batch[..take] {
            let next = rows.last().map(|m| m.id.get() + 1).unwrap_or(1);
            rows.push(Message {
                id: MessageId::new(next),
                content: pending.content.clone(),
                created_at: pending.created_at,
            });
        }

        if accepted.is_some() {
            return Err(StoreError::Unavailable(format!(
                "injected failure after {take} of {} rows",
                batch.len()
            )));
        }
        Ok(take as u64)
    }

    async fn find_since(&self, cursor: Cursor, limit: i64) -> StoreResult<Vec<Message>> {
        self.take_query_fault()?;
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|m| cursor.admits(m.id))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn latest_id(&self) -> StoreResult<Option<MessageId>> {
        self.take_query_fault()?;
        Ok(self.rows.read().await.last().map(|m| m.id))
    }

    async fn recent(&self, limit: Option<i64>) -> StoreResult<Vec<Message>> {
        self.take_query_fault()?;
        let mut snapshot = self.rows.read().await.clone();
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            snapshot.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(contents: &[&str]) -> Vec<PendingMessage> {
        contents.iter().map(|c| PendingMessage::new(*c)).collect()
    }

    #[tokio::test]
    async fn test_insert_assigns_ascending_ids() {
        let store = MemoryStore::new();
        store.insert_many(&batch(&["a", "b"])).await.unwrap();
        store.insert_many(&batch(&["c"])).await.unwrap();

        let rows = store.all().await;
        let ids: Vec<i64> = rows.iter().map(|m| m.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rows[2].content, "c");
    }

    #[tokio::test]
    async fn test_find_since_respects_cursor_and_limit() {
        let store = MemoryStore::new();
        store
            .insert_many(&batch(&["a", "b", "c", "d"]))
            .await
            .unwrap();

        let found = store
            .find_since(Cursor::After(MessageId::new(1)), 2)
            .await
            .unwrap();
        let contents: Vec<&str> = found.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_partial_insert_persists_prefix_then_fails() {
        let store = MemoryStore::new();
        store.fail_insert_after(1);

        let result = store.insert_many(&batch(&["a", "b", "c"])).await;
        assert!(result.is_err());
        assert_eq!(store.len().await, 1);

        // fault is one-shot
        store.insert_many(&batch(&["d"])).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let store = MemoryStore::new();
        let mut pending = batch(&["old", "new"]);
        pending[0].created_at -= chrono::Duration::seconds(10);
        store.insert_many(&pending).await.unwrap();

        let snapshot = store.recent(None).await.unwrap();
        assert_eq!(snapshot[0].content, "new");
        assert_eq!(snapshot[1].content, "old");

        let limited = store.recent(Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
