//! Collaborator interfaces consumed by the access-control service.
//!
//! The service is generic over these traits so the security-critical paths
//! can be exercised against in-memory fakes. Production wiring uses
//! [`PgStore`](super::queries::PgStore) and
//! [`RedisPermissionCache`](super::cache::RedisPermissionCache), constructed
//! once in `main`.

use std::collections::HashSet;

use thiserror::Error;
use uuid::Uuid;

use crate::audit::NewAuditEntry;
use crate::db::User;

use super::models::{Module, Permission, Role};

/// Failure in a persistence or cache collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] fred::error::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// User lookups needed for resolution and the decision gate.
#[allow(async_fn_in_trait)]
pub trait UserStore {
    async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    /// Roles assigned to the user where `active = true`.
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, StoreError>;
}

/// Role and permission lookups plus idempotent assignment mutations.
///
/// All mutations return whether they changed anything, so callers can emit
/// exactly one audit entry per effective change.
#[allow(async_fn_in_trait)]
pub trait RoleStore {
    async fn role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, StoreError>;

    async fn permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError>;

    async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>, StoreError>;

    /// Grant a permission to a role. Returns `false` if already granted.
    async fn grant_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// Revoke a permission from a role. Returns `false` if it was not granted.
    async fn revoke_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<bool, StoreError>;

    /// Assign a role to a user. Returns `false` if already assigned.
    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        assigned_by: Option<Uuid>,
    ) -> Result<bool, StoreError>;

    /// Remove a role from a user. Returns `false` if it was not assigned.
    async fn unassign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, StoreError>;

    /// Every user currently holding the role (for bulk cache invalidation).
    async fn users_with_role(&self, role_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

/// Module tree lookups and the re-parent mutation.
#[allow(async_fn_in_trait)]
pub trait ModuleStore {
    async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>, StoreError>;

    async fn set_module_parent(
        &self,
        module_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<(), StoreError>;
}

/// Append-only audit writer.
///
/// Failures must never fail the calling operation; the service logs them and
/// moves on.
#[allow(async_fn_in_trait)]
pub trait AuditSink {
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError>;
}

/// Optional read-through cache of effective permission sets, keyed by user.
#[allow(async_fn_in_trait)]
pub trait PermissionCache {
    async fn get(&self, user_id: Uuid) -> Result<Option<HashSet<String>>, StoreError>;

    async fn put(
        &self,
        user_id: Uuid,
        permissions: &HashSet<String>,
        ttl_secs: i64,
    ) -> Result<(), StoreError>;

    async fn invalidate(&self, user_id: Uuid) -> Result<(), StoreError>;
}
