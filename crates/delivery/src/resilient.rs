//! Bounded retry-with-reconnect around store writes.

use std::future::Future;
use std::time::Duration;

use crate::store::{NotificationStore, StoreError};

/// How hard to try before giving up on a store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause before reconnecting and trying again.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `operation`, retrying on recoverable store errors.
///
/// Between attempts the store is asked to reconnect; a failed reconnect is
/// logged and the next attempt goes ahead anyway. Non-recoverable errors and
/// the error from the last attempt are returned to the caller.
pub async fn with_reconnect_and_retry<S, F, Fut, T>(
    store: &S,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, StoreError>
where
    S: NotificationStore + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_recoverable() && attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %error,
                    "Lost connection to the notification store, reconnecting..."
                );
                tokio::time::sleep(policy.delay).await;

                if let Err(reconnect_error) = store.reconnect().await {
                    tracing::warn!(error = %reconnect_error, "Store reconnect failed");
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
