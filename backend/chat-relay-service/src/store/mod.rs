//! Message persistence
//!
//! The relay only needs an append-only log with bulk insert and a range query
//! over a monotonic id. [`PostgresStore`] is the durable implementation;
//! [`MemoryStore`] backs local development and tests.

use crate::models::{Message, MessageId, PendingMessage};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Position of the change notifier in the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    /// Nothing observed yet; the next query returns the whole log.
    #[default]
    Beginning,
    /// Every message up to and including this id has been observed.
    After(MessageId),
}

impl Cursor {
    /// Exclusive lower bound for `id > $1` queries. Ids start at 1.
    pub fn position(self) -> i64 {
        match self {
            Cursor::Beginning => 0,
            Cursor::After(id) => id.get(),
        }
    }

    /// Whether a message with this id lies strictly past the cursor.
    pub fn admits(self, id: MessageId) -> bool {
        id.get() > self.position()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert the batch in order, assigning ascending ids. Returns the row count.
    async fn insert_many(&self, batch: &[PendingMessage]) -> StoreResult<u64>;

    /// Messages with `id` past the cursor, ascending by id, at most `limit` rows.
    async fn find_since(&self, cursor: Cursor, limit: i64) -> StoreResult<Vec<Message>>;

    /// Highest id currently stored, if any.
    async fn latest_id(&self) -> StoreResult<Option<MessageId>>;

    /// Snapshot read: newest first by `created_at`. `None` returns everything.
    async fn recent(&self, limit: Option<i64>) -> StoreResult<Vec<Message>>;
}

/// Bound a store call. Elapsed calls surface as [`StoreError::Timeout`].
pub async fn with_deadline<F, T>(duration: Duration, future: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}
