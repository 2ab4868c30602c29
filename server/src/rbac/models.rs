//! Database models for the RBAC system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Role record.
///
/// `priority` orders roles in listings (higher first) and is reserved as a
/// tie-breaker for future conflicting non-boolean settings; it never removes
/// a permission from the effective union.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    /// Default roles are auto-assigned to newly registered users.
    pub is_default: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permission record. The `code` is the stable machine key (e.g. `users.delete`).
///
/// Immutable after creation except for `description` and `category`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Permission {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Module record. Modules form a tree via `parent_id` (no cycles) and group
/// permissions for hierarchical display.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Module {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-role assignment. A (user, role) pair appears at most once.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
}

// ============================================================================
// Request types for API
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(max = 256))]
    pub description: Option<String>,
    pub is_default: Option<bool>,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    #[validate(length(max = 256))]
    pub description: Option<String>,
    pub active: Option<bool>,
    pub is_default: Option<bool>,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    /// Dotted machine key, e.g. `posts.edit`.
    #[validate(length(min = 1, max = 128))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 256))]
    pub description: Option<String>,
    #[validate(length(max = 64))]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePermissionRequest {
    #[validate(length(max = 256))]
    pub description: Option<String>,
    #[validate(length(max = 64))]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateModuleRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub parent_id: Option<Uuid>,
    #[validate(length(max = 32))]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetModuleParentRequest {
    /// New parent, or `null` to move the module to the root.
    pub parent_id: Option<Uuid>,
}
