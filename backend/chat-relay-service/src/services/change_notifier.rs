//! Cursor-based change discovery
//!
//! Polls the store for rows past the last observed id and publishes one
//! `NEW_MESSAGE` event per row, in id order. This is the portable stand-in for
//! a native change feed: a store that offers one can drive the same
//! [`EventSink`] directly.
//!
//! The starting position is fixed by [`ChangeNotifier::seed`], which must
//! complete before ingress can persist anything. Ticks never move the cursor
//! anywhere but past rows they have published.

use crate::config::NotifierConfig;
use crate::error::AppResult;
use crate::metrics;
use crate::store::{with_deadline, Cursor, MessageStore};
use crate::websocket::{BroadcastEvent, EventSink};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct ChangeNotifier {
    store: Arc<dyn MessageStore>,
    sink: Arc<dyn EventSink>,
    config: NotifierConfig,
    cursor: Cursor,
}

impl ChangeNotifier {
    pub fn new(
        store: Arc<dyn MessageStore>,
        sink: Arc<dyn EventSink>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            store,
            sink,
            config,
            cursor: Cursor::Beginning,
        }
    }

    /// Move the cursor to the store's current high-water mark, so rows
    /// persisted before startup are not broadcast. A no-op when configured
    /// to start from the beginning of the log.
    pub async fn seed(&mut self) -> AppResult<Cursor> {
        if self.config.from_beginning {
            info!("Change notifier replaying the log from the beginning");
            return Ok(self.cursor);
        }

        let latest = with_deadline(self.config.store_timeout, self.store.latest_id()).await?;
        self.cursor = latest.map(Cursor::After).unwrap_or_default();
        info!(cursor = ?self.cursor, "Change notifier starting after existing messages");
        Ok(self.cursor)
    }

    /// [`seed`](Self::seed), retried every `poll_interval` up to `attempts` times.
    pub async fn seed_with_retry(&mut self, attempts: u32) -> AppResult<Cursor> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.seed().await {
                Ok(cursor) => return Ok(cursor),
                Err(e) if attempt < attempts => {
                    warn!(error = %e, attempt, "Failed to read high-water mark, retrying");
                    attempt += 1;
                    sleep(self.config.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Run one tick. Returns the number of events published.
    ///
    /// On error the cursor is left where it was, so the next tick retries
    /// the same range.
    pub async fn poll_once(&mut self) -> AppResult<usize> {
        let cursor = self.cursor;
        let messages = with_deadline(
            self.config.store_timeout,
            self.store.find_since(cursor, self.config.poll_batch_limit),
        )
        .await?;

        let fresh: Vec<_> = messages
            .into_iter()
            .filter(|m| cursor.admits(m.id))
            .collect();
        let Some(last) = fresh.last() else {
            return Ok(0);
        };
        self.cursor = Cursor::After(last.id);

        let count = fresh.len();
        for message in fresh {
            self.sink.publish(BroadcastEvent::NewMessage(message)).await;
        }

        debug!(count, cursor = ?self.cursor, "Published new messages");
        Ok(count)
    }

    /// Poll on `poll_interval` until the returned sender fires or is dropped.
    pub fn spawn(self) -> (watch::Sender<()>, JoinHandle<()>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            let mut notifier = self;
            info!(
                poll_interval_ms = notifier.config.poll_interval.as_millis() as u64,
                batch_limit = notifier.config.poll_batch_limit,
                "Started polling for new messages"
            );

            let mut ticker = interval(notifier.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!(cursor = ?notifier.cursor, "Change notifier received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = notifier.poll_once().await {
                            metrics::POLL_FAILURES.inc();
                            error!(error = %e, cursor = ?notifier.cursor, "Error polling messages");
                        }
                    }
                }
            }
        });

        (shutdown_tx, handle)
    }
}
