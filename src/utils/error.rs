use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;
use crate::utils::response::error as error_response;

/// Application error taxonomy. Fraud-suspected validation outcomes are
/// deliberately absent: they are ordinary results, not errors, so they
/// always reach the audit log and the operator UI.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientCapacity(_) => StatusCode::CONFLICT,
            AppError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InsufficientCapacity(_) => "INSUFFICIENT_CAPACITY",
            AppError::PaymentDeclined(_) => "PAYMENT_DECLINED",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            other => {
                error!(error = ?other, code = other.code(), "Application error");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::InsufficientCapacity {
                requested,
                available,
            } => AppError::InsufficientCapacity(format!(
                "requested {requested} unit(s), only {available} available"
            )),
            StoreError::DuplicateCode(code) => {
                AppError::Conflict(format!("ticket code '{code}' already exists"))
            }
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
            StoreError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level messages to the client
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, None, status)
    }
}
