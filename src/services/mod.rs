//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They talk to the database and the storage clients and own the
//! partial-failure rules of each workflow.

pub mod audit_service;
pub mod email_service;
pub mod library_service;
pub mod seed_service;
pub mod upload_service;
pub mod user_service;

#[cfg(test)]
pub(crate) mod memory;
