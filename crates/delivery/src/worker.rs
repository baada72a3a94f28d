//! Delivery worker state machine.
//!
//! Each worker loops: pop an item, send it on the connection for its
//! certificate, wait up to the poll window for an error tuple, then record the
//! outcome. Silence within the window counts as delivered. An error the gateway
//! reports after the window has closed is not matched back to its
//! notification and is never retried; the gateway's error channel is
//! asynchronous and gives no way to do better without giving up throughput.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pushgate_common::types::Notification;
use pushgate_gateway::{Certificate, Connector, ErrorTuple, GatewayConnection, GatewayError};

use crate::cache::ConnectionCache;
use crate::error::{DeliveryError, DeliveryFailure};
use crate::queue::{NotificationQueue, QueueItem};
use crate::resilient::{RetryPolicy, with_reconnect_and_retry};
use crate::store::{NotificationStore, StoreError, Validation};

/// Default time to wait for an error tuple after each send.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Tunables shared by every worker in a pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// What the gateway made of one sent notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmission {
    /// Nothing arrived on the error channel within the window.
    Accepted,
    Failed(DeliveryFailure),
}

/// Send `payload` and wait up to `window` for the gateway to object.
///
/// Transport failures during any step are reported as a disconnection rather
/// than an error, so the caller records a failed outcome and reconnects.
pub async fn transmit<G>(
    connection: &mut G,
    payload: &[u8],
    window: Duration,
) -> Result<Transmission, GatewayError>
where
    G: GatewayConnection + ?Sized,
{
    if let Err(e) = connection.send(payload).await {
        return disconnected_or(e);
    }

    match connection.poll_for_error(window).await {
        Ok(false) => return Ok(Transmission::Accepted),
        Ok(true) => {}
        Err(e) => return disconnected_or(e),
    }

    match connection.read_error_tuple().await {
        Ok(Some(bytes)) => Ok(Transmission::Failed(DeliveryFailure::Rejected(
            ErrorTuple::decode(&bytes),
        ))),
        Ok(None) => Ok(Transmission::Failed(DeliveryFailure::Disconnected)),
        Err(e) => disconnected_or(e),
    }
}

fn disconnected_or(error: GatewayError) -> Result<Transmission, GatewayError> {
    if error.is_connectivity() {
        warn!(error = %error, "Gateway connection failed");
        Ok(Transmission::Failed(DeliveryFailure::Disconnected))
    } else {
        Err(error)
    }
}

/// Write the outcome fields, retrying through store connectivity loss.
async fn record_outcome<S>(
    store: &S,
    policy: &RetryPolicy,
    notification: &Notification,
) -> Result<(), StoreError>
where
    S: NotificationStore + ?Sized,
{
    with_reconnect_and_retry(store, policy, || store.save(notification, Validation::Skip)).await
}

pub struct DeliveryWorker<C: Connector, S: NotificationStore> {
    name: String,
    queue: Arc<NotificationQueue>,
    connections: ConnectionCache<C>,
    store: Arc<S>,
    settings: WorkerSettings,
    cancellation_token: CancellationToken,
}

impl<C: Connector, S: NotificationStore> DeliveryWorker<C, S> {
    pub fn new(
        index: usize,
        queue: Arc<NotificationQueue>,
        connector: Arc<C>,
        default_certificate: Certificate,
        store: Arc<S>,
        settings: WorkerSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        let name = format!("DeliveryWorker {index}");
        Self {
            connections: ConnectionCache::new(name.clone(), connector, default_certificate),
            name,
            queue,
            store,
            settings,
            cancellation_token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process queue items until this worker pops a stop sentinel or the
    /// cancellation token fires. Cached connections are closed on the way out.
    pub async fn run(mut self) {
        info!(worker = %self.name, "Delivery worker started");

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    warn!(worker = %self.name, "Delivery worker cancelled");
                    break;
                }
                item = self.queue.pop() => item,
            };

            if self.handle(item).await.is_break() {
                break;
            }
        }

        self.connections.close_all().await;
        info!(worker = %self.name, "Delivery worker stopped");
    }

    async fn handle(&mut self, item: QueueItem) -> ControlFlow<()> {
        let flow = match item {
            QueueItem::Stop => {
                info!(worker = %self.name, "Stop requested");
                ControlFlow::Break(())
            }
            QueueItem::Deliver(mut notification) => {
                if let Err(e) = self.deliver(&mut notification).await {
                    error!(
                        worker = %self.name,
                        notification_id = notification.id,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
                ControlFlow::Continue(())
            }
        };

        self.queue.notify_processed();
        flow
    }

    async fn deliver(&mut self, notification: &mut Notification) -> Result<(), DeliveryError> {
        if notification.is_terminal() {
            warn!(
                worker = %self.name,
                notification_id = notification.id,
                "Notification already has an outcome, skipping"
            );
            return Ok(());
        }

        let connection = match self
            .connections
            .connection_for(notification.certificate.as_deref())
            .await
        {
            Ok(connection) => connection,
            Err(e) if e.is_connectivity() => {
                warn!(worker = %self.name, error = %e, "Could not reach the gateway");
                notification.mark_failed(Utc::now(), None, None);
                record_outcome(&*self.store, &self.settings.retry_policy, notification).await?;
                return Err(DeliveryFailure::Disconnected.into());
            }
            Err(e) => return Err(e.into()),
        };

        match transmit(connection, &notification.payload, self.settings.poll_timeout).await? {
            Transmission::Accepted => {
                notification.mark_delivered(Utc::now());
                record_outcome(&*self.store, &self.settings.retry_policy, notification).await?;

                info!(
                    worker = %self.name,
                    notification_id = notification.id,
                    device_token = %notification.device_token,
                    "Notification delivered"
                );
                Ok(())
            }
            Transmission::Failed(failure) => {
                notification.mark_failed(
                    Utc::now(),
                    failure.code(),
                    failure.description().map(str::to_string),
                );
                let recorded =
                    record_outcome(&*self.store, &self.settings.retry_policy, notification).await;

                error!(worker = %self.name, "Error received, reconnecting...");
                if let Err(e) = connection.reconnect().await {
                    error!(worker = %self.name, error = %e, "Reconnect failed");
                }

                recorded?;
                Err(failure.into())
            }
        }
    }
}
