//! Write batching in front of the message store
//!
//! Ingress hands messages to [`BatchWriter::enqueue`], which returns without
//! touching the store. Queued messages are written with one bulk insert when
//! either the queue reaches `max_batch_size` or `flush_interval` passes with no
//! further enqueue.
//!
//! A failed insert puts the whole batch back at the head of the queue, ahead
//! of anything that arrived in the meantime, and leaves it for the next
//! trigger. There is no retry limit and no backoff. Rows that a failed insert
//! did manage to write (or an insert that committed but timed out) are written
//! again on retry: the store sees duplicates in that case.

use crate::config::BatchConfig;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::PendingMessage;
use crate::store::{with_deadline, MessageStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingMessage>,
    timer: Option<JoinHandle<()>>,
    /// A triggered flush is queued and has not swapped the batch out yet.
    flush_scheduled: bool,
    closed: bool,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    config: BatchConfig,
    runtime: Handle,
    queue: Mutex<QueueState>,
    /// Held for the whole swap-and-insert so only one flush is in flight.
    flush_lock: AsyncMutex<()>,
}

/// Batching writer. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct BatchWriter {
    inner: Arc<Inner>,
}

impl BatchWriter {
    /// Build a writer whose flush tasks run on the current Tokio runtime.
    pub fn new(store: Arc<dyn MessageStore>, config: BatchConfig) -> AppResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::StartServer(format!("batch writer needs a Tokio runtime: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config,
                runtime,
                queue: Mutex::new(QueueState::default()),
                flush_lock: AsyncMutex::new(()),
            }),
        })
    }

    /// Queue a message for the next flush. Never waits on the store.
    ///
    /// Fails only once [`shutdown`](Self::shutdown) has begun.
    pub fn enqueue(&self, content: impl Into<String>) -> AppResult<()> {
        let message = PendingMessage::new(content);

        let mut queue = self.inner.queue.lock();
        if queue.closed {
            return Err(AppError::ServiceUnavailable(
                "message relay is shutting down".to_string(),
            ));
        }

        queue.pending.push(message);
        metrics::MESSAGES_ENQUEUED.inc();
        metrics::PENDING_MESSAGES.set(queue.pending.len() as i64);

        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }

        if queue.pending.len() >= self.inner.config.max_batch_size {
            debug!(
                queued = queue.pending.len(),
                "Batch size reached, flushing immediately"
            );
            drop(queue);
            self.schedule_flush();
        } else {
            queue.timer = Some(self.arm_timer());
        }

        Ok(())
    }

    /// Flush whatever is queued and wait for the outcome.
    ///
    /// Returns the number of messages written. On failure the batch is back
    /// in the queue when this returns.
    pub async fn flush_now(&self) -> AppResult<usize> {
        let writer = self.clone();
        // Run on a task so a caller dropping this future cannot abandon a swapped batch.
        self.inner
            .runtime
            .spawn(async move { writer.flush_batch().await })
            .await
            .map_err(|e| {
                error!(error = %e, "Flush task failed");
                AppError::Internal
            })?
    }

    /// Messages waiting for a flush
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    /// Stop accepting messages, cancel the timer and make one final flush attempt.
    ///
    /// Messages still queued after a failed final flush are lost when the
    /// process exits.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let pending = {
            let mut queue = self.inner.queue.lock();
            queue.closed = true;
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
            queue.pending.len()
        };

        info!(pending, "Draining batch writer");
        let flushed = self.flush_now().await;
        if let Err(e) = &flushed {
            warn!(
                error = %e,
                abandoned = self.pending_len(),
                "Final flush failed, queued messages will be lost"
            );
        }
        flushed
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let writer = self.clone();
        let delay = self.inner.config.flush_interval;
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so a later abort of this timer cannot cancel the flush.
            writer.schedule_flush();
        })
    }

    /// Spawn a flush unless one is already waiting for its turn. Triggers that
    /// arrive while a flush is queued are covered by it, since it takes the
    /// whole queue when it runs.
    fn schedule_flush(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.flush_scheduled {
                return;
            }
            queue.flush_scheduled = true;
        }

        let writer = self.clone();
        self.inner.runtime.spawn(async move {
            // Failures are logged and requeued inside flush_batch.
            let _ = writer.flush_batch().await;
        });
    }

    async fn flush_batch(&self) -> AppResult<usize> {
        let _in_flight = self.inner.flush_lock.lock().await;

        let batch = {
            let mut queue = self.inner.queue.lock();
            queue.flush_scheduled = false;
            std::mem::take(&mut queue.pending)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let size = batch.len();
        let result = with_deadline(
            self.inner.config.store_timeout,
            self.inner.store.insert_many(&batch),
        )
        .await;

        match result {
            Ok(_) => {
                metrics::BATCHES_FLUSHED.inc();
                metrics::MESSAGES_PERSISTED.inc_by(size as u64);
                metrics::PENDING_MESSAGES.set(self.pending_len() as i64);
                info!(batch_size = size, "Processed batch of messages");
                Ok(size)
            }
            Err(e) => {
                let mut queue = self.inner.queue.lock();
                let arrivals = std::mem::replace(&mut queue.pending, batch);
                queue.pending.extend(arrivals);
                metrics::FLUSH_FAILURES.inc();
                metrics::PENDING_MESSAGES.set(queue.pending.len() as i64);
                error!(
                    batch_size = size,
                    queued = queue.pending.len(),
                    error = %e,
                    "Error processing batch, requeued"
                );
                Err(AppError::Store(e))
            }
        }
    }
}
