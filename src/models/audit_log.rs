//! Audit log documents.
//!
//! Every tracked mutation produces one immutable `AuditLogItem` in the
//! document store. Items are keyed by a generated UUID and never updated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Row lifecycle events around which mutations are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleHook {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 6] = [
        LifecycleHook::BeforeInsert,
        LifecycleHook::AfterInsert,
        LifecycleHook::BeforeUpdate,
        LifecycleHook::AfterUpdate,
        LifecycleHook::BeforeDelete,
        LifecycleHook::AfterDelete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleHook::BeforeInsert => "before_insert",
            LifecycleHook::AfterInsert => "after_insert",
            LifecycleHook::BeforeUpdate => "before_update",
            LifecycleHook::AfterUpdate => "after_update",
            LifecycleHook::BeforeDelete => "before_delete",
            LifecycleHook::AfterDelete => "after_delete",
        }
    }

    /// The audit action recorded for this hook.
    ///
    /// Inserts are logged after the row exists (so it has an id); updates and
    /// deletes before the row changes. The other three hooks are not audited.
    pub fn audit_action(self) -> Option<AuditAction> {
        match self {
            LifecycleHook::AfterInsert => Some(AuditAction::Insert),
            LifecycleHook::BeforeUpdate => Some(AuditAction::Update),
            LifecycleHook::BeforeDelete => Some(AuditAction::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleHook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleHook::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| format!("unknown lifecycle hook '{}'", s))
    }
}

/// Action recorded in an audit log item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

/// One audit document.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "5b1e0c3e-3b0f-4a53-9d53-1f0c3c0e6f11",
///   "date_create": "2024-10-09 14:05:03",
///   "action": "INSERT",
///   "source": "BlobFile",
///   "object_uuid": "9f2c...",
///   "object_version": "2021-08-06",
///   "json_object": "{\n    \"uuid\": \"9f2c...\"\n}",
///   "auth_user_id": 640
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogItem {
    pub id: String,

    /// `%Y-%m-%d %H:%M:%S` in UTC
    pub date_create: String,
    pub action: AuditAction,

    /// Type name of the audited entity
    pub source: String,
    pub object_uuid: serde_json::Value,
    pub object_version: serde_json::Value,

    /// Full snapshot of the entity, pretty-printed
    pub json_object: String,
    pub auth_user_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_round_trip_through_their_names() {
        for hook in LifecycleHook::ALL {
            assert_eq!(hook.as_str().parse::<LifecycleHook>().unwrap(), hook);
        }
        assert!("on_commit".parse::<LifecycleHook>().is_err());
    }

    #[test]
    fn only_three_hooks_are_audited() {
        let audited: Vec<_> = LifecycleHook::ALL
            .into_iter()
            .filter_map(|hook| hook.audit_action().map(|action| (hook, action)))
            .collect();

        assert_eq!(
            audited,
            vec![
                (LifecycleHook::AfterInsert, AuditAction::Insert),
                (LifecycleHook::BeforeUpdate, AuditAction::Update),
                (LifecycleHook::BeforeDelete, AuditAction::Delete),
            ]
        );
    }

    #[test]
    fn actions_serialize_uppercase() {
        assert_eq!(serde_json::to_value(AuditAction::Update).unwrap(), "UPDATE");
        assert_eq!(AuditAction::Delete.as_str(), "DELETE");
    }
}
