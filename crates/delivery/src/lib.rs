//! Delivery core: workers that drain the notification queue, send each
//! notification to the gateway and record what happened.

pub mod cache;
pub mod error;
pub mod feeder;
pub mod pool;
pub mod queue;
pub mod resilient;
pub mod store;
pub mod worker;

pub use cache::ConnectionCache;
pub use error::{DeliveryError, DeliveryFailure, PoolError};
pub use feeder::Feeder;
pub use pool::WorkerPool;
pub use queue::{NotificationQueue, QueueItem};
pub use resilient::{RetryPolicy, with_reconnect_and_retry};
pub use store::{NotificationStore, PgNotificationStore, StoreError, Validation};
pub use worker::{DEFAULT_POLL_TIMEOUT, DeliveryWorker, Transmission, WorkerSettings, transmit};
