//! Keeps the delivery queue supplied from the store.
//!
//! A batch is only reloaded once everything from the previous one has been
//! acknowledged, so a notification still in flight is never queued twice.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::queue::NotificationQueue;
use crate::store::{NotificationStore, StoreError};

pub struct Feeder<S: NotificationStore> {
    store: Arc<S>,
    queue: Arc<NotificationQueue>,
    batch_size: i64,
    poll_interval: Duration,
}

impl<S: NotificationStore> Feeder<S> {
    pub fn new(
        store: Arc<S>,
        queue: Arc<NotificationQueue>,
        batch_size: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            batch_size,
            poll_interval,
        }
    }

    /// Feed the queue until `cancellation_token` fires.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        tracing::info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Feeder started"
        );

        loop {
            match self.enqueue_batch().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Queued notifications for delivery"),
                Err(e) => tracing::error!(error = %e, "Failed to load notifications"),
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = self.queue.wait_until_drained() => {}
            }
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Feeder stopped");
    }

    /// Queue one batch of notifications that have no outcome yet.
    pub async fn enqueue_batch(&self) -> Result<usize, StoreError> {
        let ready = self.store.ready_for_delivery(self.batch_size).await?;
        let count = ready.len();

        for notification in ready {
            self.queue.push_notification(notification).await;
        }
        Ok(count)
    }
}
