use super::{Cursor, MessageStore, StoreResult};
use crate::models::{Message, MessageId, PendingMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;

// WITH ORDINALITY + ORDER BY keeps BIGSERIAL assignment in batch order.
const INSERT_BATCH: &str = r#"
    INSERT INTO messages (content, created_at)
    SELECT content, created_at
    FROM UNNEST($1::text[], $2::timestamptz[]) WITH ORDINALITY AS batch(content, created_at, ord)
    ORDER BY ord
"#;

const SELECT_SINCE: &str = r#"
    SELECT id, content, created_at
    FROM messages
    WHERE id > $1
    ORDER BY id ASC
    LIMIT $2
"#;

const SELECT_LATEST_ID: &str = "SELECT MAX(id) AS id FROM messages";

const SELECT_RECENT: &str = r#"
    SELECT id, content, created_at
    FROM messages
    ORDER BY created_at DESC, id DESC
    LIMIT $1
"#;

/// PostgreSQL-backed message log
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &Row) -> Result<Message, tokio_postgres::Error> {
    Ok(Message {
        id: MessageId::new(row.try_get("id")?),
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn insert_many(&self, batch: &[PendingMessage]) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let contents: Vec<&str> = batch.iter().map(|m| m.content.as_str()).collect();
        let created_at: Vec<DateTime<Utc>> = batch.iter().map(|m| m.created_at).collect();

        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(INSERT_BATCH).await?;
        let inserted = client.execute(&stmt, &[&contents, &created_at]).await?;

        debug!(inserted, "Inserted message batch");
        Ok(inserted)
    }

    async fn find_since(&self, cursor: Cursor, limit: i64) -> StoreResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(SELECT_SINCE).await?;
        let rows = client.query(&stmt, &[&cursor.position(), &limit]).await?;

        Ok(rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn latest_id(&self) -> StoreResult<Option<MessageId>> {
        let client = self.pool.get().await?;
        let row = client.query_one(SELECT_LATEST_ID, &[]).await?;
        let id: Option<i64> = row.try_get("id")?;
        Ok(id.map(MessageId::new))
    }

    async fn recent(&self, limit: Option<i64>) -> StoreResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(SELECT_RECENT).await?;
        // LIMIT NULL means no limit
        let rows = client.query(&stmt, &[&limit]).await?;

        Ok(rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
