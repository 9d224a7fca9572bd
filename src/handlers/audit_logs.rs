//! Audit trail of the authenticated user.
//!
//! - GET /api/v1/audit-logs - Items written on behalf of the caller
//! - GET /api/v1/audit-logs/{id} - One of those items

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::audit_log::AuditLogItem,
    services::audit_service,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    /// Comma separated item ids
    pub ids: Option<String>,
}

/// List the caller's audit items, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/audit-logs?ids=5b1e0c3e-...,9a7d...`
///
/// With `ids`, only those items are returned. Items of other users are
/// never returned.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLogItem>>, AppError> {
    let container = &state.config.cosmos_audit_log_container;

    let ids: Vec<String> = query
        .ids
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let items = if ids.is_empty() {
        audit_service::user_audit_trail(state.documents.as_ref(), container, auth.user.id).await?
    } else {
        let mut items =
            audit_service::audit_items_by_id(state.documents.as_ref(), container, ids, true)
                .await?;
        items.retain(|item| item.auth_user_id == Some(auth.user.id));
        items.sort_by(|a, b| b.date_create.cmp(&a.date_create));
        items
    };

    Ok(Json(items))
}

/// One audit item of the caller.
///
/// # Endpoint
///
/// `GET /api/v1/audit-logs/{id}`
///
/// # Errors
///
/// - **404 Not Found**: no such item, or it belongs to another user
pub async fn get_audit_log(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<AuditLogItem>, AppError> {
    let item = audit_service::read_audit_item(
        state.documents.as_ref(),
        &state.config.cosmos_audit_log_container,
        &id,
    )
    .await?
    .filter(|item| item.auth_user_id == Some(auth.user.id))
    .ok_or(AppError::NotFound("Audit log item"))?;

    Ok(Json(item))
}
