//! Blob upload workflow.
//!
//! Stores a batch of files in one blob container, records each stored file
//! in `blob_storage_files` and tells the uploader how it went.
//!
//! # Partial Failure
//!
//! Files are independent. A file that fails to upload or to persist is
//! logged and reported in [`UploadOutcome::failed`]; the remaining files are
//! still processed. A blob whose metadata insert fails stays in storage.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Datelike, Local, NaiveDate};
use uuid::Uuid;

use crate::db::{Database, DbPool, SqlValue};
use crate::error::AppError;
use crate::models::blob_file::{BlobFile, FailedUpload, NewBlobFile};
use crate::services::email_service::Mailer;
use crate::storage::BlobStore;
use crate::validators::{days_in_month, string_to_hash256};

/// One file received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Who uploads and where to.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub user_id: i64,
    pub container_name: String,
}

/// Files stored and files skipped by one upload call.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<BlobFile>,
    pub failed: Vec<FailedUpload>,
}

/// Persistence of blob file metadata.
#[async_trait]
pub trait BlobFileRepository: Send + Sync {
    /// Insert the row and return it as stored.
    async fn insert(&self, file: NewBlobFile) -> Result<BlobFile, AppError>;
}

/// `blob_storage_files` in Postgres.
pub struct PgBlobFileRepository {
    pool: DbPool,
}

impl PgBlobFileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobFileRepository for PgBlobFileRepository {
    async fn insert(&self, file: NewBlobFile) -> Result<BlobFile, AppError> {
        let stored = sqlx::query_as::<_, BlobFile>(
            r#"
            INSERT INTO blob_storage_files (
                date_create,
                date_update,
                is_active,
                uuid,
                original_file_name,
                name,
                file_extension,
                user_id,
                container_name,
                path,
                size,
                content_type,
                etag,
                request_id,
                version
            )
            VALUES (NOW(), NOW(), TRUE, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(file.uuid)
        .bind(file.original_file_name)
        .bind(file.name)
        .bind(file.file_extension)
        .bind(file.user_id)
        .bind(file.container_name)
        .bind(file.path)
        .bind(file.size)
        .bind(file.content_type)
        .bind(file.etag)
        .bind(file.request_id)
        .bind(file.version)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }
}

/// Upload every file in `files` to the container named in `info`.
///
/// The container is created first if it does not exist yet. Failing to
/// create it aborts the whole batch, since no file could be stored.
pub async fn upload_files(
    store: &dyn BlobStore,
    repository: &dyn BlobFileRepository,
    info: &BlobInfo,
    files: Vec<UploadedFile>,
) -> Result<UploadOutcome, AppError> {
    let container_name = store.ensure_container(&info.container_name).await?;
    let mut outcome = UploadOutcome::default();

    for file in files {
        let file_name = file.file_name.clone();

        match upload_one(store, repository, info.user_id, &container_name, file).await {
            Ok(stored) => outcome.uploaded.push(stored),
            Err(e) => {
                tracing::warn!("Skipping {} after upload error: {}", file_name, e);
                outcome.failed.push(FailedUpload {
                    file_name,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Uploaded {} of {} file(s) to {}",
        outcome.uploaded.len(),
        outcome.uploaded.len() + outcome.failed.len(),
        container_name
    );

    Ok(outcome)
}

async fn upload_one(
    store: &dyn BlobStore,
    repository: &dyn BlobFileRepository,
    user_id: i64,
    container_name: &str,
    file: UploadedFile,
) -> Result<BlobFile, AppError> {
    let extension = file_extension(&file.file_name).to_string();
    let hashed = string_to_hash256(&file.file_name, true)
        .ok_or_else(|| AppError::InvalidRequest("file name is empty".to_string()))?;
    let blob_name = format!("{}.{}", hashed, extension);
    let size = i64::try_from(file.bytes.len())
        .map_err(|_| AppError::InvalidRequest("file is too large".to_string()))?;

    let receipt = store
        .upload(
            container_name,
            &blob_name,
            file.content_type.as_deref(),
            file.bytes,
        )
        .await?;

    let path = format!(
        "{}/{}/{}",
        store.public_base_url().trim_end_matches('/'),
        container_name,
        blob_name
    );

    repository
        .insert(NewBlobFile {
            uuid: Uuid::new_v4().simple().to_string(),
            original_file_name: file.file_name,
            name: blob_name,
            file_extension: extension,
            user_id,
            container_name: container_name.to_string(),
            path,
            size,
            content_type: file.content_type,
            etag: receipt.etag,
            request_id: receipt.request_id,
            version: receipt.version,
        })
        .await
}

/// Text after the last `.`; the whole name when there is no dot.
fn file_extension(file_name: &str) -> &str {
    file_name.rsplit('.').next().unwrap_or(file_name)
}

/// Which notification the uploader gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadNotice {
    All,
    Partial,
    Failed,
}

impl UploadNotice {
    /// `None` when nothing was submitted.
    pub fn for_outcome(outcome: &UploadOutcome) -> Option<Self> {
        let uploaded = outcome.uploaded.len();
        let total = uploaded + outcome.failed.len();

        match (uploaded, total) {
            (_, 0) => None,
            (0, _) => Some(UploadNotice::Failed),
            (u, t) if u == t => Some(UploadNotice::All),
            _ => Some(UploadNotice::Partial),
        }
    }

    pub fn subject(self) -> &'static str {
        match self {
            UploadNotice::All | UploadNotice::Partial => "The files have been uploaded!",
            UploadNotice::Failed => "The files upload has failed!",
        }
    }

    fn body(self, outcome: &UploadOutcome) -> String {
        let uploaded_at = Local::now().format("%d/%m/%Y %H:%M");
        let list = |names: Vec<&str>| {
            names
                .iter()
                .map(|name| format!("<li>{}</li>", name))
                .collect::<String>()
        };
        let uploaded = list(
            outcome
                .uploaded
                .iter()
                .map(|f| f.original_file_name.as_str())
                .collect(),
        );
        let failed = list(outcome.failed.iter().map(|f| f.file_name.as_str()).collect());

        match self {
            UploadNotice::All => format!(
                "<p>All files have been uploaded on {}.</p><ul>{}</ul>",
                uploaded_at, uploaded
            ),
            UploadNotice::Partial => format!(
                "<p>Some of the files have been uploaded on {}.</p><ul>{}</ul>\
                 <p>These files could not be uploaded:</p><ul>{}</ul>",
                uploaded_at, uploaded, failed
            ),
            UploadNotice::Failed => format!(
                "<p>The upload on {} has failed. No file was stored.</p><ul>{}</ul>",
                uploaded_at, failed
            ),
        }
    }
}

/// Queue the notification email for `uploader_email`.
///
/// Returns the notice that was sent, or `None` if the batch was empty.
pub async fn notify_uploader(
    mailer: &Mailer,
    uploader_email: &str,
    outcome: &UploadOutcome,
) -> Result<Option<UploadNotice>, AppError> {
    let Some(notice) = UploadNotice::for_outcome(outcome) else {
        return Ok(None);
    };

    mailer
        .send_email(
            &[uploader_email.to_string()],
            &[],
            notice.subject(),
            notice.body(outcome),
        )
        .await?;

    Ok(Some(notice))
}

/// Files uploaded by `user_id`, newest first, optionally limited to a period.
pub async fn list_user_files(
    db: &Database,
    user_id: i64,
    period: Option<(NaiveDate, NaiveDate)>,
) -> Result<Vec<BlobFile>, AppError> {
    let (query, params) = user_files_query(user_id, period);
    db.list::<BlobFile>(&query, &params).await
}

/// Statement and binds for [`list_user_files`]. Both period bounds are inclusive days.
fn user_files_query(
    user_id: i64,
    period: Option<(NaiveDate, NaiveDate)>,
) -> (String, Vec<SqlValue>) {
    let mut query =
        String::from("SELECT * FROM blob_storage_files WHERE user_id = $1 AND is_active");
    let mut params = vec![SqlValue::from(user_id)];

    if let Some((first_day, last_day)) = period {
        query.push_str(
            " AND date_create >= $2::date AND date_create < ($3::date + INTERVAL '1 day')",
        );
        params.push(SqlValue::from(first_day.format("%Y-%m-%d").to_string()));
        params.push(SqlValue::from(last_day.format("%Y-%m-%d").to_string()));
    }

    query.push_str(" ORDER BY date_create DESC");
    (query, params)
}

/// First and last day covered by already validated `year`/`month` filters.
///
/// A year alone covers the whole year; a month alone is taken in the current
/// year. `None` when neither is given.
pub fn filter_period(year: Option<&str>, month: Option<&str>) -> Option<(NaiveDate, NaiveDate)> {
    let year = year.filter(|y| !y.is_empty()).and_then(|y| y.parse::<i32>().ok());
    let month = month.filter(|m| !m.is_empty()).and_then(|m| m.parse::<u32>().ok());

    match (year, month) {
        (None, None) => None,
        (Some(year), None) => Some((
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        )),
        (year, Some(month)) => {
            let year = year.unwrap_or_else(|| Local::now().year());
            Some((
                NaiveDate::from_ymd_opt(year, month, 1)?,
                NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)?)?,
            ))
        }
    }
}
