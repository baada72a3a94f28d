use chrono::{DateTime, Utc};

use crate::error::AppError;

/// A push notification queued for delivery to the gateway.
///
/// `payload` is the complete outbound frame, built upstream. A `None`
/// `certificate` means the daemon's default certificate is used.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub device_token: String,
    pub payload: Vec<u8>,
    pub certificate: Option<String>,
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed: bool,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_code: Option<i32>,
    pub error_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// A fresh, undelivered notification.
    pub fn new(id: i64, device_token: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id,
            device_token: device_token.into(),
            payload,
            certificate: None,
            delivered: false,
            delivered_at: None,
            failed: false,
            failed_at: None,
            error_code: None,
            error_description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_certificate(mut self, certificate: impl Into<String>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    /// Whether a delivery outcome has already been recorded.
    pub fn is_terminal(&self) -> bool {
        self.delivered || self.failed
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) {
        self.delivered = true;
        self.delivered_at = Some(at);
        self.failed = false;
        self.failed_at = None;
        self.error_code = None;
        self.error_description = None;
    }

    /// Record a failure. `code` and `description` are absent when the gateway
    /// dropped the connection without reporting a status.
    pub fn mark_failed(
        &mut self,
        at: DateTime<Utc>,
        code: Option<i32>,
        description: Option<String>,
    ) {
        self.delivered = false;
        self.delivered_at = None;
        self.failed = true;
        self.failed_at = Some(at);
        self.error_code = code;
        self.error_description = description;
    }

    /// Record-level validation, run by saves that do not skip it.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.device_token.trim().is_empty() {
            return Err(AppError::Validation("device token is blank".to_string()));
        }
        if self.delivered && self.failed {
            return Err(AppError::Validation(format!(
                "notification {} cannot be both delivered and failed",
                self.id
            )));
        }
        if self.error_code.is_some() && !self.failed {
            return Err(AppError::Validation(format!(
                "notification {} has an error code but is not failed",
                self.id
            )));
        }
        Ok(())
    }
}
