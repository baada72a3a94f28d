//! Persistence of notification delivery outcomes.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use pushgate_common::db;
use pushgate_common::error::AppError;
use pushgate_common::types::Notification;

/// Whether a save runs the record's own validation first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Enforce,
    /// Outcome bookkeeping writes are privileged and skip validation.
    Skip,
}

/// Errors from the notification store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lost connection to the notification store: {0}")]
    Connectivity(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Notification {0} not found")]
    NotFound(i64),
}

impl StoreError {
    /// Transient failures worth retrying after a reconnect.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connectivity(error),
            other => StoreError::Database(other),
        }
    }
}

impl From<AppError> for StoreError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation(message) => StoreError::Validation(message),
        }
    }
}

/// Read/write contract for notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Persist the outcome fields of `notification`.
    async fn save(
        &self,
        notification: &Notification,
        validation: Validation,
    ) -> Result<(), StoreError>;

    /// Notifications with no recorded outcome, oldest first.
    async fn ready_for_delivery(&self, limit: i64) -> Result<Vec<Notification>, StoreError>;

    /// Re-establish the store's connection after a connectivity failure.
    async fn reconnect(&self) -> Result<(), StoreError>;
}

/// Postgres-backed notification store.
pub struct PgNotificationStore {
    database_url: String,
    max_connections: u32,
    pool: RwLock<PgPool>,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool, database_url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            pool: RwLock::new(pool),
        }
    }

    async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    /// Load a single notification by id.
    pub async fn find(&self, id: i64) -> Result<Notification, StoreError> {
        sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, device_token, payload, certificate, delivered, delivered_at,
                   failed, failed_at, error_code, error_description, created_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool().await)
        .await?
        .ok_or(StoreError::NotFound(id))
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn save(
        &self,
        notification: &Notification,
        validation: Validation,
    ) -> Result<(), StoreError> {
        if validation == Validation::Enforce {
            notification.validate()?;
        }

        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET delivered = $2, delivered_at = $3, failed = $4, failed_at = $5,
                error_code = $6, error_description = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(notification.id)
        .bind(notification.delivered)
        .bind(notification.delivered_at)
        .bind(notification.failed)
        .bind(notification.failed_at)
        .bind(notification.error_code)
        .bind(&notification.error_description)
        .execute(&self.pool().await)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(notification.id));
        }
        Ok(())
    }

    async fn ready_for_delivery(&self, limit: i64) -> Result<Vec<Notification>, StoreError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, device_token, payload, certificate, delivered, delivered_at,
                   failed, failed_at, error_code, error_description, created_at
            FROM notifications
            WHERE delivered = false AND failed = false
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool().await)
        .await?;

        Ok(notifications)
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        let fresh = db::connect(&self.database_url, self.max_connections).await?;

        let stale = std::mem::replace(&mut *self.pool.write().await, fresh);
        stale.close().await;

        tracing::info!("Reconnected to the notification store");
        Ok(())
    }
}
