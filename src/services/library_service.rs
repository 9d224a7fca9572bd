//! Document library workflows: browse, fetch and file reports into folders.
//!
//! Callers pass paths relative to the configured root folder. They are
//! resolved here and may not climb out of it.

use serde::Serialize;

use crate::error::AppError;
use crate::services::upload_service::UploadedFile;
use crate::storage::{DocumentLibrary, LibraryItem};

/// A library file as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryFile {
    /// Absolute URL of the file
    pub file_path: String,
    pub file_relative_path: String,
    pub file_name: String,
}

impl LibraryFile {
    fn from_item(domain: &str, item: LibraryItem) -> Self {
        Self {
            file_path: format!("{}{}", domain.trim_end_matches('/'), item.server_relative_url),
            file_relative_path: item.server_relative_url,
            file_name: item.name,
        }
    }
}

/// Resolve `relative` under `root`.
///
/// Empty segments are dropped; `.` and `..` are rejected.
pub fn resolve_path(root: &str, relative: &str) -> Result<String, AppError> {
    let mut path = root.trim_end_matches('/').to_string();

    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(AppError::InvalidRequest(format!(
                "'{}' is not a valid library path",
                relative
            )));
        }
        path.push('/');
        path.push_str(segment);
    }

    Ok(path)
}

/// Every file below `folder`, sub-folders included.
///
/// With `search`, only files whose server relative path contains it are kept.
pub async fn list_files(
    library: &dyn DocumentLibrary,
    folder: &str,
    search: Option<&str>,
) -> Result<Vec<LibraryFile>, AppError> {
    let search = search.filter(|s| !s.is_empty());
    let mut pending = vec![folder.to_string()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let listing = library.list_folder(&current).await?;
        pending.extend(listing.folders.into_iter().map(|f| f.server_relative_url));

        files.extend(
            listing
                .files
                .into_iter()
                .filter(|file| search.is_none_or(|s| file.server_relative_url.contains(s)))
                .map(|file| LibraryFile::from_item(library.domain(), file)),
        );
    }

    files.sort_by(|a, b| a.file_relative_path.cmp(&b.file_relative_path));
    Ok(files)
}

/// Make sure `root/path` exists, creating each missing level.
///
/// The library creates one level per call, so parents are created first.
/// Returns the full folder path.
pub async fn ensure_directory(
    library: &dyn DocumentLibrary,
    root: &str,
    path: &str,
) -> Result<String, AppError> {
    let full_path = resolve_path(root, path)?;
    if library.folder_exists(&full_path).await? {
        return Ok(full_path);
    }

    let mut current = root.trim_end_matches('/').to_string();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = format!("{}/{}", current, segment);
        if !library.folder_exists(&current).await? {
            library.create_folder(&current).await?;
        }
    }

    tracing::info!("Created library folder {}", full_path);
    Ok(full_path)
}

/// Upload `files` into `root/path`, creating the folders as needed.
///
/// Stops at the first failing file; files stored before it stay stored.
pub async fn upload_files(
    library: &dyn DocumentLibrary,
    root: &str,
    path: &str,
    files: Vec<UploadedFile>,
) -> Result<Vec<LibraryFile>, AppError> {
    let folder = ensure_directory(library, root, path).await?;

    let mut stored = Vec::with_capacity(files.len());
    for file in files {
        let item = library.upload(&folder, &file.file_name, file.bytes).await?;
        stored.push(LibraryFile::from_item(library.domain(), item));
    }

    tracing::info!("Stored {} file(s) in {}", stored.len(), folder);
    Ok(stored)
}

/// Content of the file at `path`.
pub async fn download_file(
    library: &dyn DocumentLibrary,
    path: &str,
) -> Result<bytes::Bytes, AppError> {
    library
        .download(path)
        .await?
        .ok_or(AppError::NotFound("File"))
}
