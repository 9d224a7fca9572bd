//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (multipart body, query string, auth context)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Audit trail of the caller
pub mod audit_logs;

/// Blob file upload and listing endpoints
pub mod files;

/// Liveness endpoint
pub mod health;

/// Indicator catalogue
pub mod indicators;

/// Document library endpoints
pub mod library;

/// Current user endpoint
pub mod users;

use crate::error::AppError;

/// Fallback for unknown paths, answered in the JSON error format.
pub async fn route_not_found() -> AppError {
    AppError::NotFound("Route")
}
