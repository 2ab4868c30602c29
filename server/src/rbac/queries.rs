//! Database queries for the RBAC system.
//!
//! Provides async functions for managing:
//! - Roles and role-permission grants
//! - User-role assignments
//! - Permissions
//! - Module hierarchy

use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::NewAuditEntry;
use crate::db::User;

use super::models::{Module, Permission, Role};
use super::store::{AuditSink, ModuleStore, RoleStore, StoreError, UserStore};

// ============================================================================
// Role Queries
// ============================================================================

/// Get all roles, ordered by priority (descending) then name.
pub async fn get_all_roles(pool: &PgPool) -> sqlx::Result<Vec<Role>> {
    sqlx::query_as::<_, Role>(
        r"
        SELECT id, name, description, active, is_default, priority, created_at, updated_at
        FROM roles
        ORDER BY priority DESC, name ASC
        ",
    )
    .fetch_all(pool)
    .await
}

/// Get a specific role by ID.
pub async fn get_role(pool: &PgPool, role_id: Uuid) -> sqlx::Result<Option<Role>> {
    sqlx::query_as::<_, Role>(
        r"
        SELECT id, name, description, active, is_default, priority, created_at, updated_at
        FROM roles
        WHERE id = $1
        ",
    )
    .bind(role_id)
    .fetch_optional(pool)
    .await
}

/// Get the active default roles (auto-assigned at registration).
pub async fn get_default_roles(pool: &PgPool) -> sqlx::Result<Vec<Role>> {
    sqlx::query_as::<_, Role>(
        r"
        SELECT id, name, description, active, is_default, priority, created_at, updated_at
        FROM roles
        WHERE is_default = true
          AND active = true
        ORDER BY priority DESC
        ",
    )
    .fetch_all(pool)
    .await
}

/// Create a new role.
pub async fn create_role(
    pool: &PgPool,
    name: &str,
    description: Option<&str>,
    is_default: bool,
    priority: i32,
) -> sqlx::Result<Role> {
    sqlx::query_as::<_, Role>(
        r"
        INSERT INTO roles (name, description, is_default, priority)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, description, active, is_default, priority, created_at, updated_at
        ",
    )
    .bind(name)
    .bind(description)
    .bind(is_default)
    .bind(priority)
    .fetch_one(pool)
    .await
}

/// Update a role.
///
/// Uses COALESCE to only update provided fields.
pub async fn update_role(
    pool: &PgPool,
    role_id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
    active: Option<bool>,
    is_default: Option<bool>,
    priority: Option<i32>,
) -> sqlx::Result<Option<Role>> {
    sqlx::query_as::<_, Role>(
        r"
        UPDATE roles
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            active = COALESCE($4, active),
            is_default = COALESCE($5, is_default),
            priority = COALESCE($6, priority),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, name, description, active, is_default, priority, created_at, updated_at
        ",
    )
    .bind(role_id)
    .bind(name)
    .bind(description)
    .bind(active)
    .bind(is_default)
    .bind(priority)
    .fetch_optional(pool)
    .await
}

/// Delete a role that no user holds.
///
/// Returns `true` if deleted, `false` if the role is still assigned to at
/// least one user (referential invariant) or does not exist.
pub async fn delete_unreferenced_role(pool: &PgPool, role_id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        DELETE FROM roles
        WHERE id = $1
          AND NOT EXISTS (SELECT 1 FROM user_roles WHERE role_id = $1)
        ",
    )
    .bind(role_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Permission Queries
// ============================================================================

/// Get all permissions, grouped for display by category then code.
pub async fn get_all_permissions(pool: &PgPool) -> sqlx::Result<Vec<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        SELECT id, code, name, description, category, created_at
        FROM permissions
        ORDER BY category ASC NULLS LAST, code ASC
        ",
    )
    .fetch_all(pool)
    .await
}

/// Look up a permission by its stable code.
pub async fn get_permission_by_code(
    pool: &PgPool,
    code: &str,
) -> sqlx::Result<Option<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        SELECT id, code, name, description, category, created_at
        FROM permissions
        WHERE code = $1
        ",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

/// Create a new permission.
pub async fn create_permission(
    pool: &PgPool,
    code: &str,
    name: &str,
    description: Option<&str>,
    category: Option<&str>,
) -> sqlx::Result<Permission> {
    sqlx::query_as::<_, Permission>(
        r"
        INSERT INTO permissions (code, name, description, category)
        VALUES ($1, $2, $3, $4)
        RETURNING id, code, name, description, category, created_at
        ",
    )
    .bind(code)
    .bind(name)
    .bind(description)
    .bind(category)
    .fetch_one(pool)
    .await
}

/// Update a permission's mutable fields (description and category only;
/// code and name are immutable after creation).
pub async fn update_permission(
    pool: &PgPool,
    permission_id: Uuid,
    description: Option<&str>,
    category: Option<&str>,
) -> sqlx::Result<Option<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        UPDATE permissions
        SET description = COALESCE($2, description),
            category = COALESCE($3, category)
        WHERE id = $1
        RETURNING id, code, name, description, category, created_at
        ",
    )
    .bind(permission_id)
    .bind(description)
    .bind(category)
    .fetch_optional(pool)
    .await
}

/// Get all permissions granted to a role.
pub async fn get_permissions_for_role(
    pool: &PgPool,
    role_id: Uuid,
) -> sqlx::Result<Vec<Permission>> {
    sqlx::query_as::<_, Permission>(
        r"
        SELECT p.id, p.code, p.name, p.description, p.category, p.created_at
        FROM permissions p
        INNER JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = $1
        ORDER BY p.code ASC
        ",
    )
    .bind(role_id)
    .fetch_all(pool)
    .await
}

/// Grant a permission to a role.
///
/// Uses ON CONFLICT DO NOTHING so repeated grants are no-ops. Returns `true`
/// only when the grant actually changed state.
pub async fn add_role_permission(
    pool: &PgPool,
    role_id: Uuid,
    permission_id: Uuid,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        INSERT INTO role_permissions (role_id, permission_id)
        VALUES ($1, $2)
        ON CONFLICT (role_id, permission_id) DO NOTHING
        ",
    )
    .bind(role_id)
    .bind(permission_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Revoke a permission from a role.
///
/// Returns `true` if a grant was removed, `false` if it did not exist.
pub async fn remove_role_permission(
    pool: &PgPool,
    role_id: Uuid,
    permission_id: Uuid,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        DELETE FROM role_permissions
        WHERE role_id = $1
          AND permission_id = $2
        ",
    )
    .bind(role_id)
    .bind(permission_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// User-Role Queries
// ============================================================================

/// Get all *active* roles assigned to a user.
pub async fn get_roles_for_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<Role>> {
    sqlx::query_as::<_, Role>(
        r"
        SELECT r.id, r.name, r.description, r.active, r.is_default, r.priority,
               r.created_at, r.updated_at
        FROM roles r
        INNER JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = $1
          AND r.active = true
        ORDER BY r.priority DESC
        ",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Assign a role to a user.
///
/// Uses ON CONFLICT DO NOTHING to silently ignore duplicate assignments.
/// Returns `true` only when the assignment actually changed state.
pub async fn assign_user_role(
    pool: &PgPool,
    user_id: Uuid,
    role_id: Uuid,
    assigned_by: Option<Uuid>,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        INSERT INTO user_roles (user_id, role_id, assigned_by)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, role_id) DO NOTHING
        ",
    )
    .bind(user_id)
    .bind(role_id)
    .bind(assigned_by)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove a role from a user.
///
/// Returns `true` if the assignment existed, `false` otherwise.
pub async fn remove_user_role(pool: &PgPool, user_id: Uuid, role_id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r"
        DELETE FROM user_roles
        WHERE user_id = $1
          AND role_id = $2
        ",
    )
    .bind(user_id)
    .bind(role_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Every user holding the role. Used for bulk cache invalidation after a
/// role-permission mutation.
pub async fn get_users_with_role(pool: &PgPool, role_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT user_id FROM user_roles WHERE role_id = $1")
        .bind(role_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// ============================================================================
// Module Queries
// ============================================================================

/// Get all modules.
pub async fn get_all_modules(pool: &PgPool) -> sqlx::Result<Vec<Module>> {
    sqlx::query_as::<_, Module>(
        r"
        SELECT id, name, parent_id, kind, created_at, updated_at
        FROM modules
        ORDER BY name ASC
        ",
    )
    .fetch_all(pool)
    .await
}

/// Get a specific module by ID.
pub async fn get_module(pool: &PgPool, module_id: Uuid) -> sqlx::Result<Option<Module>> {
    sqlx::query_as::<_, Module>(
        r"
        SELECT id, name, parent_id, kind, created_at, updated_at
        FROM modules
        WHERE id = $1
        ",
    )
    .bind(module_id)
    .fetch_optional(pool)
    .await
}

/// Create a new module.
pub async fn create_module(
    pool: &PgPool,
    name: &str,
    parent_id: Option<Uuid>,
    kind: &str,
) -> sqlx::Result<Module> {
    sqlx::query_as::<_, Module>(
        r"
        INSERT INTO modules (name, parent_id, kind)
        VALUES ($1, $2, $3)
        RETURNING id, name, parent_id, kind, created_at, updated_at
        ",
    )
    .bind(name)
    .bind(parent_id)
    .bind(kind)
    .fetch_one(pool)
    .await
}

/// Set (or clear) a module's parent.
///
/// Cycle checking happens in the service layer before this runs.
pub async fn set_module_parent(
    pool: &PgPool,
    module_id: Uuid,
    parent_id: Option<Uuid>,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE modules
        SET parent_id = $2, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(module_id)
    .bind(parent_id)
    .execute(pool)
    .await?;

    Ok(())
}

// ============================================================================
// Store implementation
// ============================================================================

/// Postgres-backed store used in production wiring.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserStore for PgStore {
    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(crate::db::find_user_by_id(&self.pool, user_id).await?)
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, StoreError> {
        Ok(get_roles_for_user(&self.pool, user_id).await?)
    }
}

impl RoleStore for PgStore {
    async fn role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(get_role(&self.pool, role_id).await?)
    }

    async fn permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
        Ok(get_permission_by_code(&self.pool, code).await?)
    }

    async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>, StoreError> {
        Ok(get_permissions_for_role(&self.pool, role_id).await?)
    }

    async fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(add_role_permission(&self.pool, role_id, permission_id).await?)
    }

    async fn revoke_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError> {
        Ok(remove_role_permission(&self.pool, role_id, permission_id).await?)
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        assigned_by: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        Ok(assign_user_role(&self.pool, user_id, role_id, assigned_by).await?)
    }

    async fn unassign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, StoreError> {
        Ok(remove_user_role(&self.pool, user_id, role_id).await?)
    }

    async fn users_with_role(&self, role_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(get_users_with_role(&self.pool, role_id).await?)
    }
}

impl ModuleStore for PgStore {
    async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>, StoreError> {
        Ok(get_module(&self.pool, module_id).await?)
    }

    async fn set_module_parent(
        &self,
        module_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        Ok(set_module_parent(&self.pool, module_id, parent_id).await?)
    }
}

impl AuditSink for PgStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
        crate::audit::append(&self.pool, &entry).await?;
        Ok(())
    }
}
