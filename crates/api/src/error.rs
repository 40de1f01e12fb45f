//! HTTP error responses.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use splitledger_core::ledger::LedgerError;
use splitledger_core::notification::NotificationError;
use splitledger_shared::AppError;
use splitledger_shared::types::MoneyError;
use tracing::error;

/// Any error a handler can return.
///
/// Renders as `{"error": <code>, "message": <text>}`. Internal failures are
/// logged and replaced with a generic message.
#[derive(Debug)]
pub enum ApiError {
    /// Ledger operation failed.
    Ledger(LedgerError),
    /// Inbox operation failed.
    Notification(NotificationError),
    /// Request-level failure.
    App(AppError),
    /// The body, query or path could not be extracted.
    Rejected {
        /// Status axum chose for the rejection.
        status: StatusCode,
        /// Rejection detail.
        message: String,
    },
}

impl ApiError {
    /// Shorthand for a 400 with a validation message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::App(AppError::Validation(message.into()))
    }

    fn parts(&self) -> (u16, &'static str, String) {
        match self {
            Self::Ledger(err) => (err.http_status_code(), err.error_code(), err.to_string()),
            Self::Notification(err) => (500, err.error_code(), err.to_string()),
            Self::App(err) => (err.status_code(), err.error_code(), err.to_string()),
            Self::Rejected { status, message } => {
                (status.as_u16(), "INVALID_REQUEST", message.clone())
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        Self::Notification(err)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MoneyError> for ApiError {
    fn from(err: MoneyError) -> Self {
        Self::validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status.is_server_error() {
            error!(error = %message, code, "Request failed");
            "An internal error occurred".to_string()
        } else {
            message
        };

        let mut response = (status, Json(json!({ "error": code, "message": message }))).into_response();
        if let Self::Ledger(err) = &self
            && err.is_retryable()
        {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, axum::http::HeaderValue::from_static("1"));
        }
        response
    }
}
