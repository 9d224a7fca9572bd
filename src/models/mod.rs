//! Data models representing database rows, stored documents and queue payloads.

/// Blob file metadata rows
pub mod blob_file;
/// Audit log documents
pub mod audit_log;
/// Queued email payload
pub mod email;
/// Accrual indicators and their formulas
pub mod indicator;
/// Authenticated user rows
pub mod user;
