//! Notification errors.

use thiserror::Error;

/// Errors from the notification inbox.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Backing store failure.
    #[error("Notification storage error: {0}")]
    Storage(String),
}

impl NotificationError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "NOTIFICATION_STORAGE_ERROR",
        }
    }
}
