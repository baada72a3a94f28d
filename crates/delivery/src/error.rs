//! Error types for notification delivery.

use std::time::Duration;

use pushgate_gateway::{ErrorTuple, GatewayError};
use thiserror::Error;

use crate::store::StoreError;

/// Why a sent notification was not accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The gateway answered with an error tuple.
    Rejected(ErrorTuple),
    /// The gateway dropped the connection without a tuple, or the send failed.
    Disconnected,
}

impl DeliveryFailure {
    pub fn code(&self) -> Option<i32> {
        match self {
            DeliveryFailure::Rejected(tuple) => Some(i32::from(tuple.status)),
            DeliveryFailure::Disconnected => None,
        }
    }

    pub fn description(&self) -> Option<&'static str> {
        match self {
            DeliveryFailure::Rejected(tuple) => Some(tuple.description()),
            DeliveryFailure::Disconnected => None,
        }
    }
}

/// Errors surfaced while delivering a single notification.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(
        "Unable to deliver notification {notification_id}, received gateway error {code} ({description})"
    )]
    Rejected {
        code: u8,
        notification_id: u32,
        description: &'static str,
    },

    #[error("The gateway disconnected without reporting an error")]
    Disconnected,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DeliveryFailure> for DeliveryError {
    fn from(failure: DeliveryFailure) -> Self {
        match failure {
            DeliveryFailure::Rejected(tuple) => DeliveryError::Rejected {
                code: tuple.status,
                notification_id: tuple.notification_id,
                description: tuple.description(),
            },
            DeliveryFailure::Disconnected => DeliveryError::Disconnected,
        }
    }
}

/// Errors from managing the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("workers did not stop within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    #[error("worker {worker} panicked: {error}")]
    WorkerPanic { worker: String, error: String },
}
