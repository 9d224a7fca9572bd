//! HTTP middleware components.
//!
//! Middleware run before route handlers. They can:
//! - Authenticate requests
//! - Short-circuit requests (reject unauthorized)

/// Bearer token authentication middleware
pub mod auth;
