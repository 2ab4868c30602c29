//! Audit Log
//!
//! Append-only record of security-relevant events: authorization denials,
//! role/permission mutations, account lifecycle changes, and auth events.
//! Entries are never mutated or deleted after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Audited action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserRegistered,
    UserStatusChanged,
    LoginSucceeded,
    LoginFailed,
    AccountLocked,
    PasswordChanged,
    EmailConfirmed,
    TotpEnabled,
    TotpDisabled,
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    PermissionCreated,
    PermissionUpdated,
    PermissionGranted,
    PermissionRevoked,
    RoleAssigned,
    RoleRemoved,
    ModuleCreated,
    ModuleMoved,
    AccessDenied,
    AccessGranted,
}

/// Stored audit log entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Acting user; `None` for system actions.
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Option<String>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entry to be appended. Built by callers, stamped by the database.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: Option<String>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewAuditEntry {
    /// Build an entry for the given action and target.
    #[must_use]
    pub fn new(action: AuditAction, target_type: &str) -> Self {
        Self {
            actor_id: None,
            action,
            target_type: target_type.to_string(),
            target_id: None,
            old_values: None,
            new_values: None,
            ip_address: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub const fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    #[must_use]
    pub fn target(mut self, target_id: impl ToString) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    #[must_use]
    pub fn old_values(mut self, values: JsonValue) -> Self {
        self.old_values = Some(values);
        self
    }

    #[must_use]
    pub fn new_values(mut self, values: JsonValue) -> Self {
        self.new_values = Some(values);
        self
    }

    #[must_use]
    pub fn origin(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// Append an entry to the audit log.
pub async fn append(pool: &PgPool, entry: &NewAuditEntry) -> sqlx::Result<AuditEntry> {
    sqlx::query_as::<_, AuditEntry>(
        r"
        INSERT INTO audit_log
            (actor_id, action, target_type, target_id, old_values, new_values, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING
            id, actor_id, action, target_type, target_id,
            old_values, new_values, ip_address, user_agent, created_at
        ",
    )
    .bind(entry.actor_id)
    .bind(entry.action)
    .bind(&entry.target_type)
    .bind(&entry.target_id)
    .bind(&entry.old_values)
    .bind(&entry.new_values)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .fetch_one(pool)
    .await
}

/// Record an entry without blocking the caller.
///
/// Spawns the insert; a failure is logged and otherwise dropped. Auditing
/// must never fail the operation being audited.
pub fn record(pool: &PgPool, entry: NewAuditEntry) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = append(&pool, &entry).await {
            tracing::warn!(error = %e, action = ?entry.action, "Failed to write audit entry");
        }
    });
}

/// Get audit log entries with pagination and optional action filter.
pub async fn list(
    pool: &PgPool,
    limit: i64,
    offset: i64,
    action_filter: Option<AuditAction>,
) -> sqlx::Result<Vec<AuditEntry>> {
    if let Some(action) = action_filter {
        sqlx::query_as::<_, AuditEntry>(
            r"
            SELECT
                id, actor_id, action, target_type, target_id,
                old_values, new_values, ip_address, user_agent, created_at
            FROM audit_log
            WHERE action = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(action)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, AuditEntry>(
            r"
            SELECT
                id, actor_id, action, target_type, target_id,
                old_values, new_values, ip_address, user_agent, created_at
            FROM audit_log
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let actor = Uuid::now_v7();
        let entry = NewAuditEntry::new(AuditAction::PermissionRevoked, "role")
            .actor(actor)
            .target("editor")
            .old_values(serde_json::json!({"code": "posts.edit"}))
            .origin(Some("10.0.0.1".into()), Some("curl/8".into()));

        assert_eq!(entry.actor_id, Some(actor));
        assert_eq!(entry.action, AuditAction::PermissionRevoked);
        assert_eq!(entry.target_type, "role");
        assert_eq!(entry.target_id.as_deref(), Some("editor"));
        assert!(entry.old_values.is_some());
        assert!(entry.new_values.is_none());
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.1"));
    }
}
