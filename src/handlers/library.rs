//! Document library endpoints.
//!
//! - GET /api/v1/library/files - List files below a folder
//! - POST /api/v1/library/files - Upload files into a folder
//! - GET /api/v1/library/files/download - Download one file
//!
//! Paths are relative to the configured root folder. Every route answers
//! 503 when the library is not configured.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{
    error::AppError,
    services::library_service::{self, LibraryFile},
    state::AppState,
    storage::DocumentLibrary,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListLibraryQuery {
    #[serde(default)]
    pub folder: String,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub path: String,
}

/// The library client and its root folder.
fn library(state: &AppState) -> Result<(Arc<dyn DocumentLibrary>, String), AppError> {
    let library = state
        .library
        .clone()
        .ok_or(AppError::Unavailable("Document library"))?;
    let settings = state
        .config
        .sharepoint()
        .ok_or(AppError::Unavailable("Document library"))?;

    Ok((library, settings.root_folder))
}

/// List files below `folder`, sub-folders included.
///
/// # Endpoint
///
/// `GET /api/v1/library/files?folder=2024/Q1&search=accrual`
///
/// # Response (200 OK)
///
/// ```json
/// [
///   {
///     "file_path": "https://contoso.sharepoint.com/sites/reports/Shared Documents/2024/Q1/accrual.xlsx",
///     "file_relative_path": "/sites/reports/Shared Documents/2024/Q1/accrual.xlsx",
///     "file_name": "accrual.xlsx"
///   }
/// ]
/// ```
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListLibraryQuery>,
) -> Result<Json<Vec<LibraryFile>>, AppError> {
    let (library, root) = library(&state)?;
    let folder = library_service::resolve_path(&root, &query.folder)?;

    let files =
        library_service::list_files(library.as_ref(), &folder, query.search.as_deref()).await?;

    Ok(Json(files))
}

/// Upload files into `folder`, creating missing folders.
///
/// # Endpoint
///
/// `POST /api/v1/library/files` (multipart/form-data: `folder`, `files`)
pub async fn upload_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<LibraryFile>>), AppError> {
    let (library, root) = library(&state)?;
    let (folder, files) = super::files::read_files_form(multipart, "folder").await?;

    let stored = library_service::upload_files(
        library.as_ref(),
        &root,
        folder.as_deref().unwrap_or_default(),
        files,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(stored)))
}

/// Download one file.
///
/// # Endpoint
///
/// `GET /api/v1/library/files/download?path=2024/Q1/accrual.xlsx`
///
/// # Errors
///
/// - **404 Not Found**: the file does not exist
pub async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (library, root) = library(&state)?;
    let path = library_service::resolve_path(&root, &query.path)?;

    let content = library_service::download_file(library.as_ref(), &path).await?;
    let file_name = path.rsplit('/').next().unwrap_or_default().replace('"', "");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        content,
    ))
}
