//! Unified error handling
//!
//! Application-level error type and response envelope for the HTTP boundary.
//!
//! # Error code scheme
//!
//! | Code  | Category | HTTP |
//! |-------|----------|------|
//! | E0000 | success | 200 |
//! | E0002 | validation failure | 400 |
//! | E0003 | resource not found | 404 |
//! | E0004 | conflict | 409 |
//! | E0005 | insufficient stock | 409 |
//! | E0006 | gateway rejection | 502 |
//! | E9001 | internal error | 500 |
//! | E9002 | storage error | 500 |
//! | E9003 | consistency violation | 500 |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Unified API response envelope
///
/// ```json
/// {
///   "code": "E0000",
///   "message": "Success",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct AppResponse<T> {
    /// Error code (E0000 means success)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Offending field for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Application error enum
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Caller errors (4xx) ==========
    #[error("Validation failed for {field}: {message}")]
    /// Malformed input, user-correctable (400)
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    /// Missing resource (404)
    NotFound(String),

    #[error("Conflict: {0}")]
    /// State conflict, e.g. initiating payment on a paid order (409)
    Conflict(String),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    /// Named per product; the whole checkout was aborted (409)
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    // ========== Upstream errors ==========
    #[error("Payment gateway error: {0}")]
    /// Gateway rejection or network failure during initiation (502)
    Gateway(String),

    // ========== System errors (5xx) ==========
    #[error("Storage error: {0}")]
    Database(String),

    #[error("Consistency violation: {0}")]
    /// Transition attempted from an unexpected source state - a logic fault
    Consistency(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<crate::store::StorageError> for AppError {
    fn from(err: crate::store::StorageError) -> Self {
        use crate::store::StorageError;
        match err {
            StorageError::OrderNotFound(n) => AppError::NotFound(format!("order {n} not found")),
            StorageError::DuplicateOrder(n) => AppError::Conflict(format!("order {n} already exists")),
            StorageError::ConsistencyViolation(msg) => AppError::Consistency(msg),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut field = None;

        let (status, code, message) = match &self {
            AppError::Validation { field: f, message } => {
                field = Some(f.clone());
                (StatusCode::BAD_REQUEST, "E0002", message.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "E0003", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "E0004", msg.clone()),
            AppError::InsufficientStock { .. } => {
                (StatusCode::CONFLICT, "E0005", self.to_string())
            }
            AppError::Gateway(msg) => (StatusCode::BAD_GATEWAY, "E0006", msg.clone()),
            AppError::Database(msg) => {
                error!(target: "storage", error = %msg, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9002",
                    "Storage error".to_string(),
                )
            }
            AppError::Consistency(msg) => {
                error!(target: "consistency", error = %msg, "Consistency violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9003",
                    "Consistency violation".to_string(),
                )
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "E9001",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(AppResponse::<()> {
            code: code.to_string(),
            message,
            data: None,
            field,
        });

        (status, body).into_response()
    }
}

/// Application-level Result type used in HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Create a successful response
pub fn ok<T: Serialize>(data: T) -> Json<AppResponse<T>> {
    Json(AppResponse {
        code: "E0000".to_string(),
        message: "Success".to_string(),
        data: Some(data),
        field: None,
    })
}
