//! Shared in-process delivery queue.
//!
//! Many producers push, many workers pop. Every popped item, sentinel or not,
//! must be acknowledged with [`NotificationQueue::notify_processed`] so that
//! producers can wait for in-flight work to drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify};

use pushgate_common::types::Notification;

/// An entry in the delivery queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Deliver(Notification),
    /// Tells exactly one worker to stop.
    Stop,
}

/// FIFO queue with a completion counter.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    items: Mutex<VecDeque<QueueItem>>,
    available: Notify,
    drained: Notify,
    pushed: AtomicU64,
    processed: AtomicU64,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: QueueItem) {
        self.pushed.fetch_add(1, Ordering::SeqCst);
        self.items.lock().await.push_back(item);
        self.available.notify_one();
    }

    pub async fn push_notification(&self, notification: Notification) {
        self.push(QueueItem::Deliver(notification)).await;
    }

    pub async fn push_stop(&self) {
        self.push(QueueItem::Stop).await;
    }

    /// Wait for the next item. Cancel-safe: nothing is removed unless this
    /// future completes.
    pub async fn pop(&self) -> QueueItem {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut items = self.items.lock().await;
            if let Some(item) = items.pop_front() {
                if !items.is_empty() {
                    self.available.notify_one();
                }
                return item;
            }
            drop(items);

            notified.await;
        }
    }

    /// Acknowledge one popped item as fully handled.
    pub fn notify_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.drained.notify_waiters();
    }

    /// Number of acknowledged items.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Items pushed but not yet acknowledged, including those in flight.
    pub fn pending(&self) -> u64 {
        self.pushed
            .load(Ordering::SeqCst)
            .saturating_sub(self.processed.load(Ordering::SeqCst))
    }

    /// Items still waiting to be popped.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Resolve once every pushed item has been acknowledged.
    pub async fn wait_until_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.pending() == 0 {
                return;
            }
            drained.await;
        }
    }
}
