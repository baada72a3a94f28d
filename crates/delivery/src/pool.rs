//! Pool of delivery workers draining one shared queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pushgate_gateway::{Certificate, Connector};

use crate::error::PoolError;
use crate::queue::NotificationQueue;
use crate::store::NotificationStore;
use crate::worker::{DeliveryWorker, WorkerSettings};

/// Spawns and stops a fixed number of [`DeliveryWorker`]s.
///
/// Graceful stop enqueues one sentinel per worker, so notifications already
/// ahead of the sentinels are still delivered. The cancellation token is the
/// hard stop, used when a graceful stop overruns its deadline.
pub struct WorkerPool<C: Connector, S: NotificationStore> {
    queue: Arc<NotificationQueue>,
    connector: Arc<C>,
    store: Arc<S>,
    default_certificate: Certificate,
    settings: WorkerSettings,
    worker_count: usize,
    cancellation_token: CancellationToken,
    workers: Vec<(String, JoinHandle<()>)>,
    stop_requested: bool,
}

impl<C: Connector, S: NotificationStore> WorkerPool<C, S> {
    pub fn new(
        worker_count: usize,
        queue: Arc<NotificationQueue>,
        connector: Arc<C>,
        default_certificate: Certificate,
        store: Arc<S>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            connector,
            store,
            default_certificate,
            settings,
            worker_count,
            cancellation_token: CancellationToken::new(),
            workers: Vec::new(),
            stop_requested: false,
        }
    }

    /// Spawn all workers. Calling it on a running pool does nothing.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            warn!("Worker pool already started");
            return;
        }

        for index in 0..self.worker_count {
            let worker = DeliveryWorker::new(
                index,
                self.queue.clone(),
                self.connector.clone(),
                self.default_certificate.clone(),
                self.store.clone(),
                self.settings.clone(),
                self.cancellation_token.child_token(),
            );
            let name = worker.name().to_string();
            let handle = tokio::spawn(worker.run());
            self.workers.push((name, handle));
        }

        info!(workers = self.workers.len(), "Delivery workers started");
    }

    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ask every worker to stop once it reaches its sentinel.
    pub async fn stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;

        for (name, _) in &self.workers {
            info!(worker = %name, "Requesting worker stop");
            self.queue.push_stop().await;
        }
    }

    /// Stop all workers and wait for them to exit. If they have not finished
    /// within `timeout` they are cancelled and an error is returned.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<(), PoolError> {
        info!(
            workers = self.workers.len(),
            timeout_seconds = timeout.as_secs(),
            "Shutting down delivery workers"
        );
        self.stop().await;

        let workers = std::mem::take(&mut self.workers);
        let join_all = async {
            let mut first_panic = None;
            for (name, handle) in workers {
                if let Err(join_error) = handle.await {
                    error!(worker = %name, error = %join_error, "Delivery worker panicked");
                    first_panic.get_or_insert(PoolError::WorkerPanic {
                        worker: name,
                        error: join_error.to_string(),
                    });
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(None) => {
                info!("Delivery workers stopped");
                Ok(())
            }
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                self.cancellation_token.cancel();
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "Delivery workers did not drain in time, cancelling"
                );
                Err(PoolError::ShutdownTimeout { timeout })
            }
        }
    }
}
