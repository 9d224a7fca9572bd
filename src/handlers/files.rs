//! Blob file HTTP handlers.
//!
//! This module implements the file-related API endpoints:
//! - POST /api/v1/files - Upload files to a blob container
//! - GET /api/v1/files - List files uploaded by the authenticated user

use axum::{
    Extension, Json,
    extract::{Multipart, Query, State},
    http::StatusCode,
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        audit_log::LifecycleHook,
        blob_file::{BlobFile, ListFilesQuery, UploadResponse},
    },
    services::{
        audit_service::{self, AuditTarget},
        upload_service::{self, BlobInfo, UploadOutcome, UploadedFile},
    },
    state::AppState,
    storage::blob::validate_container_name,
    validators::check_month_and_year_filter_parameters,
};

/// Upload one or more files.
///
/// # Endpoint
///
/// `POST /api/v1/files` (multipart/form-data)
///
/// # Form Fields
///
/// - `container_name`: target blob container
/// - `files`: one part per file
///
/// # Response
///
/// - **201 Created**: at least one file was stored
/// - **200 OK**: every file failed; see `failed`
/// - **400**: missing container name or no files
///
/// ```json
/// {
///   "uploaded": [{ "uuid": "9f2c...", "original_file_name": "q1.pdf", "...": "..." }],
///   "failed": [{ "file_name": "q2.pdf", "reason": "Storage error: ..." }]
/// }
/// ```
///
/// The uploader is notified by email and every stored file is audit-logged.
/// Once files are stored the response always lists them: a failing
/// notification or audit write is logged and does not fail the request.
pub async fn upload_files(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let (container_name, files) = read_files_form(multipart, "container_name").await?;
    let container_name = container_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("container_name is required".to_string()))?;
    validate_container_name(&container_name)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let info = BlobInfo {
        user_id: auth.user.id,
        container_name,
    };
    let outcome = upload_service::upload_files(
        state.blob_store.as_ref(),
        state.blob_files.as_ref(),
        &info,
        files,
    )
    .await?;

    if let Err(e) = upload_service::notify_uploader(&state.mailer, &auth.user.email, &outcome).await
    {
        tracing::error!("Upload notice for user {} was not queued: {}", auth.user.id, e);
    }
    if let Err(e) = audit_uploads(&state, auth.user.id, &outcome).await {
        tracing::error!(
            "Audit log for {} file(s) uploaded by user {} was not written: {}",
            outcome.uploaded.len(),
            auth.user.id,
            e
        );
    }

    let status = if outcome.uploaded.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(UploadResponse {
            uploaded: outcome.uploaded,
            failed: outcome.failed,
        }),
    ))
}

async fn audit_uploads(
    state: &AppState,
    user_id: i64,
    outcome: &UploadOutcome,
) -> Result<(), AppError> {
    let targets = outcome
        .uploaded
        .iter()
        .map(AuditTarget::entity)
        .collect::<Result<Vec<_>, _>>()?;

    audit_service::write_audit_log(
        state.documents.as_ref(),
        &state.config.cosmos_audit_log_container,
        &targets,
        LifecycleHook::AfterInsert,
        Some(user_id),
    )
    .await?;

    Ok(())
}

/// Read a multipart form of `files` parts plus one text field named `text_field`.
///
/// The text value is trimmed. At least one file is required.
pub(super) async fn read_files_form(
    mut multipart: Multipart,
    text_field: &str,
) -> Result<(Option<String>, Vec<UploadedFile>), AppError> {
    let mut text = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("files") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::InvalidRequest("file part has no file name".into()))?;
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.body_text()))?;

                files.push(UploadedFile {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            Some(name) if name == text_field => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::InvalidRequest(e.body_text()))?;
                text = Some(value.trim().to_string());
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(AppError::InvalidRequest("no files were sent".to_string()));
    }

    Ok((text, files))
}

/// List files uploaded by the authenticated user.
///
/// # Endpoint
///
/// `GET /api/v1/files?year=2024&month=10`
///
/// Both filters are optional. An invalid year or month returns 400 with
/// every validation message.
pub async fn list_files(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Vec<BlobFile>>, AppError> {
    let year = query.year.as_deref();
    let month = query.month.as_deref();

    let validation = check_month_and_year_filter_parameters(year, month, true);
    if !validation.is_valid {
        return Err(AppError::Validation(validation.messages));
    }

    let period = upload_service::filter_period(year, month);
    let files = upload_service::list_user_files(&state.db, auth.user.id, period).await?;

    Ok(Json(files))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::middleware::auth::test_token;
    use crate::state::TestBackends;
    use crate::storage::memory::InMemoryDocuments;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, header},
        middleware::from_fn_with_state,
        routing::post,
    };
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-UPLOAD-BOUNDARY";

    /// Multipart body with one text field and one part per `(file name, content)`.
    pub(crate) fn multipart_body(
        text_field: (&str, &str),
        files: &[(&str, &str)],
    ) -> (String, String) {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            text_field.0,
            text_field.1,
            b = BOUNDARY
        );
        for (file_name, content) in files {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
                 Content-Type: application/pdf\r\n\r\n{}\r\n",
                file_name,
                content,
                b = BOUNDARY
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        (format!("multipart/form-data; boundary={}", BOUNDARY), body)
    }

    fn upload_router(backends: &TestBackends) -> Router {
        let state = backends.state();
        Router::new()
            .route("/api/v1/files", post(upload_files))
            .layer(from_fn_with_state(
                state.clone(),
                crate::middleware::auth::auth_middleware,
            ))
            .with_state(state)
    }

    async fn upload(backends: &TestBackends, container: &str, files: &[(&str, &str)]) -> axum::response::Response {
        let (content_type, body) = multipart_body(("container_name", container), files);
        let token = test_token("access", 640, 300, "test-secret");

        upload_router(backends)
            .oneshot(
                Request::post("/api/v1/files")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn uploads_are_stored_audited_and_notified() {
        let backends = TestBackends::new();

        let response = upload(&backends, "reports", &[("q1.pdf", "first"), ("q2.pdf", "second")]).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["uploaded"].as_array().unwrap().len(), 2);
        assert_eq!(body["failed"], serde_json::json!([]));

        assert_eq!(backends.blob_files.rows().len(), 2);
        let audited = backends.documents.items();
        assert_eq!(audited.len(), 2);
        assert_eq!(audited[0].1["action"], "INSERT");
        assert_eq!(audited[0].1["auth_user_id"], 640);
        assert_eq!(backends.queue.sent().len(), 1);
    }

    #[tokio::test]
    async fn stored_files_are_returned_when_the_audit_log_is_down() {
        let backends = TestBackends::with_documents(InMemoryDocuments::unavailable());

        let response = upload(&backends, "reports", &[("q1.pdf", "first")]).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let stored = &backends.blob_files.rows()[0];
        assert_eq!(body["uploaded"][0]["uuid"], stored.uuid.as_str());
        assert_eq!(body["uploaded"][0]["path"], stored.path.as_str());

        let sent = backends.queue.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1["subject"], "The files have been uploaded!");
    }

    #[tokio::test]
    async fn failed_batch_answers_ok_with_failures() {
        let backends = TestBackends {
            blob_store: std::sync::Arc::new(crate::storage::memory::InMemoryBlobStore::failing_on(&[0])),
            ..TestBackends::new()
        };

        let response = upload(&backends, "reports", &[("q1.pdf", "first")]).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["failed"][0]["file_name"], "q1.pdf");
        assert!(backends.documents.items().is_empty());
        assert_eq!(
            backends.queue.sent()[0].1["subject"],
            "The files upload has failed!"
        );
    }

    #[tokio::test]
    async fn invalid_container_names_are_rejected() {
        let backends = TestBackends::new();

        let response = upload(&backends, "Bad_Name", &[("q1.pdf", "first")]).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(backends.blob_files.rows().is_empty());
    }
}
