//! Administration HTTP Handlers
//!
//! CRUD over users, roles, permissions, and modules, plus audit log access.
//! Every route group is gated by an explicit permission code in
//! [`router`](super::router).

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::AppState;
use crate::audit::{self, AuditAction, AuditEntry, NewAuditEntry};
use crate::auth::AuthUser;
use crate::db::{self, UserStatus};
use crate::rbac::models::{
    CreateModuleRequest, CreatePermissionRequest, CreateRoleRequest, Module, Permission, Role,
    SetModuleParentRequest, UpdatePermissionRequest, UpdateRoleRequest,
};
use crate::rbac::queries;
use crate::rbac::service::AuditContext;
use crate::rbac::RbacError;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Audit listing query parameters.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Exact action filter (e.g. `permission_revoked`).
    pub action: Option<AuditAction>,
}

/// Administrative view of a user account.
#[derive(Debug, Serialize)]
pub struct AdminUserView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    pub email_confirmed: bool,
    pub totp_enabled: bool,
    pub lockout_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<db::User> for AdminUserView {
    fn from(user: db::User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            status: user.status,
            email_confirmed: user.email_confirmed,
            totp_enabled: user.totp_secret.is_some(),
            lockout_until: user.lockout_until,
            created_at: user.created_at,
        }
    }
}

/// Status change request.
#[derive(Debug, Deserialize)]
pub struct SetUserStatusRequest {
    pub status: UserStatus,
}

/// Resolved permission set response.
#[derive(Debug, Serialize)]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    pub permissions: Vec<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Build the audit context for an admin mutation.
fn audit_ctx(auth: &AuthUser, addr: SocketAddr, headers: &HeaderMap) -> AuditContext {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.chars().take(512).collect());

    AuditContext {
        actor_id: Some(auth.id),
        ip_address: Some(addr.ip().to_string()),
        user_agent,
    }
}

// ============================================================================
// Users
// ============================================================================

/// List user accounts.
///
/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<AdminUserView>>, RbacError> {
    let users = db::list_users(&state.db, page.limit(), page.offset()).await?;

    Ok(Json(users.into_iter().map(AdminUserView::from).collect()))
}

/// Get one user account.
///
/// GET /api/admin/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<AdminUserView>, RbacError> {
    let user = db::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or(RbacError::NotFound("user"))?;

    Ok(Json(AdminUserView::from(user)))
}

/// Change a user's lifecycle status.
///
/// Any transition away from `Active` revokes the user's sessions.
///
/// PUT /api/admin/users/{id}/status
#[tracing::instrument(skip(state, auth, headers, body))]
pub async fn set_user_status(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SetUserStatusRequest>,
) -> Result<Json<AdminUserView>, RbacError> {
    let before = db::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or(RbacError::NotFound("user"))?;

    let after = db::update_user_status(&state.db, user_id, body.status)
        .await?
        .ok_or(RbacError::NotFound("user"))?;

    if body.status != UserStatus::Active {
        db::delete_sessions_for_user(&state.db, user_id).await?;
    }

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::UserStatusChanged, "user")
            .actor(auth.id)
            .target(user_id)
            .old_values(serde_json::json!({ "status": before.status }))
            .new_values(serde_json::json!({ "status": after.status }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(AdminUserView::from(after)))
}

/// Soft-delete a user account.
///
/// The row is retained with status `Deleted`; role history stays for audit
/// purposes.
///
/// DELETE /api/admin/users/{id}
#[tracing::instrument(skip(state, auth, headers))]
pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Result<Json<AdminUserView>, RbacError> {
    let before = db::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or(RbacError::NotFound("user"))?;

    let after = db::update_user_status(&state.db, user_id, UserStatus::Deleted)
        .await?
        .ok_or(RbacError::NotFound("user"))?;

    db::delete_sessions_for_user(&state.db, user_id).await?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::UserStatusChanged, "user")
            .actor(auth.id)
            .target(user_id)
            .old_values(serde_json::json!({ "status": before.status }))
            .new_values(serde_json::json!({ "status": UserStatus::Deleted }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(AdminUserView::from(after)))
}

/// Resolve a user's effective permission set.
///
/// GET /api/admin/users/{id}/permissions
pub async fn get_user_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EffectivePermissionsResponse>, RbacError> {
    let set: HashSet<String> = state.access.resolve_effective_permissions(user_id).await?;

    let mut permissions: Vec<String> = set.into_iter().collect();
    permissions.sort_unstable();

    Ok(Json(EffectivePermissionsResponse {
        user_id,
        permissions,
    }))
}

/// Assign a role to a user (idempotent).
///
/// PUT /api/admin/users/{user_id}/roles/{role_id}
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let ctx = audit_ctx(&auth, addr, &headers);
    state
        .access
        .assign_role_to_user(user_id, role_id, &ctx)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Role assigned" })))
}

/// Remove a role from a user (idempotent).
///
/// DELETE /api/admin/users/{user_id}/roles/{role_id}
pub async fn remove_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let ctx = audit_ctx(&auth, addr, &headers);
    state
        .access
        .remove_role_from_user(user_id, role_id, &ctx)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Role removed" })))
}

// ============================================================================
// Roles
// ============================================================================

/// List roles.
///
/// GET /api/admin/roles
pub async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, RbacError> {
    Ok(Json(queries::get_all_roles(&state.db).await?))
}

/// Create a role.
///
/// POST /api/admin/roles
#[tracing::instrument(skip(state, auth, headers, body), fields(name = %body.name))]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateRoleRequest>,
) -> Result<Json<Role>, RbacError> {
    body.validate()
        .map_err(|e| RbacError::Validation(e.to_string()))?;

    let role = queries::create_role(
        &state.db,
        &body.name,
        body.description.as_deref(),
        body.is_default.unwrap_or(false),
        body.priority.unwrap_or(0),
    )
    .await?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::RoleCreated, "role")
            .actor(auth.id)
            .target(role.id)
            .new_values(serde_json::json!({
                "name": role.name,
                "is_default": role.is_default,
                "priority": role.priority,
            }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(role))
}

/// Update a role.
///
/// PUT /api/admin/roles/{id}
#[tracing::instrument(skip(state, auth, headers, body))]
pub async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    Json(body): Json<UpdateRoleRequest>,
) -> Result<Json<Role>, RbacError> {
    body.validate()
        .map_err(|e| RbacError::Validation(e.to_string()))?;

    let before = queries::get_role(&state.db, role_id)
        .await?
        .ok_or(RbacError::NotFound("role"))?;

    let after = queries::update_role(
        &state.db,
        role_id,
        body.name.as_deref(),
        body.description.as_deref(),
        body.active,
        body.is_default,
        body.priority,
    )
    .await?
    .ok_or(RbacError::NotFound("role"))?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::RoleUpdated, "role")
            .actor(auth.id)
            .target(role_id)
            .old_values(serde_json::json!({
                "name": before.name,
                "active": before.active,
                "is_default": before.is_default,
                "priority": before.priority,
            }))
            .new_values(serde_json::json!({
                "name": after.name,
                "active": after.active,
                "is_default": after.is_default,
                "priority": after.priority,
            }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(after))
}

/// Delete a role that no user holds.
///
/// DELETE /api/admin/roles/{id}
#[tracing::instrument(skip(state, auth, headers))]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let role = queries::get_role(&state.db, role_id)
        .await?
        .ok_or(RbacError::NotFound("role"))?;

    let deleted = queries::delete_unreferenced_role(&state.db, role_id).await?;
    if !deleted {
        // The role exists, so the delete was refused by the reference check
        return Err(RbacError::StillReferenced("role"));
    }

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::RoleDeleted, "role")
            .actor(auth.id)
            .target(role_id)
            .old_values(serde_json::json!({ "name": role.name }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(serde_json::json!({ "message": "Role deleted" })))
}

/// List a role's granted permissions.
///
/// GET /api/admin/roles/{id}/permissions
pub async fn list_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, RbacError> {
    queries::get_role(&state.db, role_id)
        .await?
        .ok_or(RbacError::NotFound("role"))?;

    Ok(Json(
        queries::get_permissions_for_role(&state.db, role_id).await?,
    ))
}

/// Grant a permission to a role (idempotent).
///
/// PUT /api/admin/roles/{id}/permissions/{code}
pub async fn grant_permission_to_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((role_id, code)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let ctx = audit_ctx(&auth, addr, &headers);
    state
        .access
        .assign_permission_to_role(role_id, &code, &ctx)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Permission granted" })))
}

/// Revoke a permission from a role (idempotent).
///
/// DELETE /api/admin/roles/{id}/permissions/{code}
pub async fn revoke_permission_from_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path((role_id, code)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let ctx = audit_ctx(&auth, addr, &headers);
    state
        .access
        .revoke_permission_from_role(role_id, &code, &ctx)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Permission revoked" })))
}

// ============================================================================
// Permissions
// ============================================================================

/// List permissions.
///
/// GET /api/admin/permissions
pub async fn list_permissions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Permission>>, RbacError> {
    Ok(Json(queries::get_all_permissions(&state.db).await?))
}

/// Create a permission.
///
/// POST /api/admin/permissions
#[tracing::instrument(skip(state, auth, headers, body), fields(code = %body.code))]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreatePermissionRequest>,
) -> Result<Json<Permission>, RbacError> {
    body.validate()
        .map_err(|e| RbacError::Validation(e.to_string()))?;

    let permission = queries::create_permission(
        &state.db,
        &body.code,
        &body.name,
        body.description.as_deref(),
        body.category.as_deref(),
    )
    .await?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::PermissionCreated, "permission")
            .actor(auth.id)
            .target(&permission.code)
            .new_values(serde_json::json!({
                "code": permission.code,
                "category": permission.category,
            }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(permission))
}

/// Update a permission's description/category.
///
/// PUT /api/admin/permissions/{id}
#[tracing::instrument(skip(state, auth, headers, body))]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
    Json(body): Json<UpdatePermissionRequest>,
) -> Result<Json<Permission>, RbacError> {
    body.validate()
        .map_err(|e| RbacError::Validation(e.to_string()))?;

    let permission = queries::update_permission(
        &state.db,
        permission_id,
        body.description.as_deref(),
        body.category.as_deref(),
    )
    .await?
    .ok_or(RbacError::NotFound("permission"))?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::PermissionUpdated, "permission")
            .actor(auth.id)
            .target(&permission.code)
            .new_values(serde_json::json!({
                "description": permission.description,
                "category": permission.category,
            }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(permission))
}

// ============================================================================
// Modules
// ============================================================================

/// List modules.
///
/// GET /api/admin/modules
pub async fn list_modules(State(state): State<AppState>) -> Result<Json<Vec<Module>>, RbacError> {
    Ok(Json(queries::get_all_modules(&state.db).await?))
}

/// Create a module.
///
/// POST /api/admin/modules
#[tracing::instrument(skip(state, auth, headers, body), fields(name = %body.name))]
pub async fn create_module(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateModuleRequest>,
) -> Result<Json<Module>, RbacError> {
    body.validate()
        .map_err(|e| RbacError::Validation(e.to_string()))?;

    if let Some(parent_id) = body.parent_id {
        queries::get_module(&state.db, parent_id)
            .await?
            .ok_or(RbacError::NotFound("parent module"))?;
    }

    let module = queries::create_module(
        &state.db,
        &body.name,
        body.parent_id,
        body.kind.as_deref().unwrap_or("feature"),
    )
    .await?;

    let ctx = audit_ctx(&auth, addr, &headers);
    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::ModuleCreated, "module")
            .actor(auth.id)
            .target(module.id)
            .new_values(serde_json::json!({
                "name": module.name,
                "parent_id": module.parent_id,
            }))
            .origin(ctx.ip_address, ctx.user_agent),
    );

    Ok(Json(module))
}

/// Re-parent a module (cycle-checked).
///
/// PUT /api/admin/modules/{id}/parent
pub async fn set_module_parent(
    State(state): State<AppState>,
    auth: AuthUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(module_id): Path<Uuid>,
    Json(body): Json<SetModuleParentRequest>,
) -> Result<Json<serde_json::Value>, RbacError> {
    let ctx = audit_ctx(&auth, addr, &headers);
    state
        .access
        .set_parent_module(module_id, body.parent_id, &ctx)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Module moved" })))
}

// ============================================================================
// Audit Log
// ============================================================================

/// List audit log entries (newest first).
///
/// GET /api/admin/audit
pub async fn list_audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, RbacError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    Ok(Json(
        audit::list(&state.db, limit, offset, query.action).await?,
    ))
}
