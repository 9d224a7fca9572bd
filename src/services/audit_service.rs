//! Audit log writer.
//!
//! Converts changed entities into [`AuditLogItem`] documents and appends them
//! to the audit container of the document store. Also reads them back.
//!
//! # Failure Policy
//!
//! Document store errors are returned to the caller. A failed write is never
//! retried or silently dropped here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::audit_log::{AuditLogItem, LifecycleHook};
use crate::models::blob_file::BlobFile;
use crate::storage::{DocumentFilter, DocumentStore};

/// Source name used for plain mappings.
const MAPPING_SOURCE: &str = "Mapping";

/// An entity whose mutations are audited.
pub trait Auditable: Serialize {
    /// Type name stored as the `source` of the log item.
    fn source_name(&self) -> &'static str;
}

impl Auditable for BlobFile {
    fn source_name(&self) -> &'static str {
        "BlobFile"
    }
}

/// Something to audit: a typed entity snapshot or a plain JSON mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditTarget {
    Entity {
        source: &'static str,
        fields: Map<String, Value>,
    },
    Mapping(Map<String, Value>),
}

impl AuditTarget {
    /// Snapshot `entity` as a field mapping.
    ///
    /// Fields whose names start with `_` hold internal tracking state and are
    /// left out of the snapshot.
    pub fn entity<T: Auditable>(entity: &T) -> Result<Self, AppError> {
        let value = serde_json::to_value(entity)
            .map_err(|e| AppError::Internal(format!("entity snapshot failed: {}", e)))?;

        let Value::Object(mut fields) = value else {
            return Err(AppError::Internal(format!(
                "{} did not serialize to an object",
                entity.source_name()
            )));
        };
        fields.retain(|name, _| !name.starts_with('_'));

        Ok(AuditTarget::Entity {
            source: entity.source_name(),
            fields,
        })
    }

    pub fn mapping(fields: Map<String, Value>) -> Self {
        AuditTarget::Mapping(fields)
    }

    fn source(&self) -> &str {
        match self {
            AuditTarget::Entity { source, .. } => source,
            AuditTarget::Mapping(_) => MAPPING_SOURCE,
        }
    }

    fn fields(&self) -> &Map<String, Value> {
        match self {
            AuditTarget::Entity { fields, .. } => fields,
            AuditTarget::Mapping(fields) => fields,
        }
    }
}

/// Build one log item per target.
///
/// # Errors
///
/// - `Internal` if `hook` is not one of the audited hooks
/// - `InvalidRequest` if a target has no `uuid` or `version` field
pub fn build_audit_items(
    targets: &[AuditTarget],
    hook: LifecycleHook,
    auth_user_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<Vec<AuditLogItem>, AppError> {
    let action = hook
        .audit_action()
        .ok_or_else(|| AppError::Internal(format!("lifecycle hook '{}' is not audited", hook)))?;
    let date_create = now.format("%Y-%m-%d %H:%M:%S").to_string();

    targets
        .iter()
        .map(|target| -> Result<AuditLogItem, AppError> {
            let fields = target.fields();
            let required = |name: &str| {
                fields.get(name).cloned().ok_or_else(|| {
                    AppError::InvalidRequest(format!(
                        "{} snapshot has no '{}' field",
                        target.source(),
                        name
                    ))
                })
            };

            Ok(AuditLogItem {
                id: Uuid::new_v4().to_string(),
                date_create: date_create.clone(),
                action,
                source: target.source().to_string(),
                object_uuid: required("uuid")?,
                object_version: required("version")?,
                json_object: pretty_json(fields)?,
                auth_user_id,
            })
        })
        .collect()
}

/// Append one audit document per target to `container`.
///
/// Items are written one by one; there is no ordering guarantee between
/// targets passed in the same call.
pub async fn write_audit_log(
    store: &dyn DocumentStore,
    container: &str,
    targets: &[AuditTarget],
    hook: LifecycleHook,
    auth_user_id: Option<i64>,
) -> Result<Vec<AuditLogItem>, AppError> {
    let items = build_audit_items(targets, hook, auth_user_id, Utc::now())?;
    if items.is_empty() {
        return Ok(items);
    }

    let documents = items
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Internal(format!("audit item serialization failed: {}", e)))?;

    store.ensure_container(container).await?;
    store.create_items(container, documents).await?;

    tracing::info!(
        "wrote {} audit log item(s) for {} ({})",
        items.len(),
        hook,
        items[0].action.as_str()
    );

    Ok(items)
}

/// Every audit item written on behalf of `user_id`, newest first.
pub async fn user_audit_trail(
    store: &dyn DocumentStore,
    container: &str,
    user_id: i64,
) -> Result<Vec<AuditLogItem>, AppError> {
    let filter = DocumentFilter::FieldEquals {
        field: "auth_user_id".to_string(),
        value: Value::from(user_id),
    };

    let mut items = query_audit_items(store, container, &filter).await?;
    items.sort_by(|a, b| b.date_create.cmp(&a.date_create));
    Ok(items)
}

/// Audit items whose id is in `ids`, or not in `ids` when `is_in` is false.
pub async fn audit_items_by_id(
    store: &dyn DocumentStore,
    container: &str,
    ids: Vec<String>,
    is_in: bool,
) -> Result<Vec<AuditLogItem>, AppError> {
    let filter = DocumentFilter::IdIn {
        ids,
        negate: !is_in,
    };

    query_audit_items(store, container, &filter).await
}

/// One audit item, or `None` if there is no item with `id`.
pub async fn read_audit_item(
    store: &dyn DocumentStore,
    container: &str,
    id: &str,
) -> Result<Option<AuditLogItem>, AppError> {
    store.ensure_container(container).await?;

    store
        .read_item(container, id)
        .await?
        .map(parse_item)
        .transpose()
}

async fn query_audit_items(
    store: &dyn DocumentStore,
    container: &str,
    filter: &DocumentFilter,
) -> Result<Vec<AuditLogItem>, AppError> {
    store.ensure_container(container).await?;

    store
        .query_items(container, filter)
        .await?
        .into_iter()
        .map(parse_item)
        .collect()
}

/// Stored documents carry service metadata (`_rid`, `_ts`, ...), which is ignored.
fn parse_item(document: Value) -> Result<AuditLogItem, AppError> {
    serde_json::from_value(document)
        .map_err(|e| AppError::Internal(format!("unreadable audit item: {}", e)))
}

/// Serialize with 4-space indentation.
fn pretty_json(fields: &Map<String, Value>) -> Result<String, AppError> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);

    fields
        .serialize(&mut serializer)
        .map_err(|e| AppError::Internal(format!("snapshot serialization failed: {}", e)))?;

    String::from_utf8(buffer).map_err(|e| AppError::Internal(e.to_string()))
}
