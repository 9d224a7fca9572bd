//! Blob file metadata.
//!
//! One row per file stored in blob storage. Rows are written once after a
//! successful upload and never updated by this service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a row of the `blob_storage_files` table.
///
/// # Path Uniqueness
///
/// `path` is `domain/container/name`, where `name` is a SHA-256 of the
/// original name salted with the upload time, so two uploads never share a
/// path even when the original file names are equal.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize)]
pub struct BlobFile {
    pub id: i64,
    pub date_create: DateTime<Utc>,
    pub date_update: DateTime<Utc>,
    pub is_active: bool,

    /// Public identifier (UUID v4 without dashes)
    pub uuid: String,

    pub original_file_name: String,

    /// Stored blob name: hashed original name plus its extension
    pub name: String,
    pub file_extension: String,
    pub user_id: i64,
    pub container_name: String,
    pub path: String,

    /// Size in bytes
    pub size: i64,
    pub content_type: Option<String>,

    /// Values returned by blob storage for the upload
    pub etag: String,
    pub request_id: String,
    pub version: String,
}

/// Values inserted for a freshly uploaded blob.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBlobFile {
    pub uuid: String,
    pub original_file_name: String,
    pub name: String,
    pub file_extension: String,
    pub user_id: i64,
    pub container_name: String,
    pub path: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub etag: String,
    pub request_id: String,
    pub version: String,
}

impl NewBlobFile {
    /// Materialize the row as the database would return it.
    pub fn into_blob_file(self, id: i64, now: DateTime<Utc>) -> BlobFile {
        BlobFile {
            id,
            date_create: now,
            date_update: now,
            is_active: true,
            uuid: self.uuid,
            original_file_name: self.original_file_name,
            name: self.name,
            file_extension: self.file_extension,
            user_id: self.user_id,
            container_name: self.container_name,
            path: self.path,
            size: self.size,
            content_type: self.content_type,
            etag: self.etag,
            request_id: self.request_id,
            version: self.version,
        }
    }
}

/// Query parameters for `GET /api/v1/files`.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    pub year: Option<String>,
    pub month: Option<String>,
}

/// A file that could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUpload {
    pub file_name: String,
    pub reason: String,
}

/// Response body for `POST /api/v1/files`.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<BlobFile>,
    pub failed: Vec<FailedUpload>,
}
