//! Access-control service.
//!
//! Combines the stores, the pure resolver, the optional permission cache,
//! and audit emission into the operations handlers call. Every decision
//! path is fail-closed: a store or cache failure can deny, never allow.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::{AuditAction, NewAuditEntry};
use crate::db::UserStatus;

use super::cache::RedisPermissionCache;
use super::error::{Denied, DenyReason, RbacError};
use super::resolver;
use super::store::{AuditSink, ModuleStore, PermissionCache, RoleStore, UserStore};

/// Whether an authorization check is audit-worthy on success.
///
/// Denials are always audited. Routine checks (most reads) skip the audit
/// entry on allow to keep the log from flooding; sensitive checks record
/// both outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPolicy {
    Routine,
    Sensitive,
}

/// Who performed an operation and from where, for audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub actor_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    fn stamp(&self, entry: NewAuditEntry) -> NewAuditEntry {
        let mut entry = entry.origin(self.ip_address.clone(), self.user_agent.clone());
        entry.actor_id = self.actor_id;
        entry
    }
}

/// Access-control service over pluggable stores.
#[derive(Clone)]
pub struct AccessControl<S, C = RedisPermissionCache> {
    store: S,
    cache: Option<C>,
    cache_ttl: i64,
}

impl<S> AccessControl<S, RedisPermissionCache> {
    /// Create a service without a permission cache.
    pub const fn new(store: S) -> Self {
        Self {
            store,
            cache: None,
            cache_ttl: 0,
        }
    }
}

impl<S, C> AccessControl<S, C> {
    /// Create a service with a read-through permission cache.
    pub const fn with_cache(store: S, cache: C, cache_ttl: i64) -> Self {
        Self {
            store,
            cache: Some(cache),
            cache_ttl,
        }
    }
}

impl<S, C> AccessControl<S, C>
where
    S: UserStore + RoleStore + ModuleStore + AuditSink,
    C: PermissionCache,
{
    // ========================================================================
    // Resolution
    // ========================================================================

    /// Compute the effective permission set for a user.
    ///
    /// Soft-deleted users still resolve; the decision layer denies them.
    /// Results are cached per user when a cache is configured.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_effective_permissions(
        &self,
        user_id: Uuid,
    ) -> Result<HashSet<String>, RbacError> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(RbacError::NotFound("user"))?;

        self.effective_for(user_id).await.map_err(Into::into)
    }

    /// Cache-aware effective-set computation. Cache failures degrade to a
    /// recompute, never to an error.
    async fn effective_for(
        &self,
        user_id: Uuid,
    ) -> Result<HashSet<String>, super::store::StoreError> {
        if let Some(cache) = &self.cache {
            match cache.get(user_id).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, %user_id, "Permission cache read failed");
                }
            }
        }

        let roles = self.store.roles_for_user(user_id).await?;

        let mut grants = Vec::with_capacity(roles.len());
        for role in roles {
            let permissions = self.store.permissions_for_role(role.id).await?;
            grants.push((role, permissions));
        }

        let effective = resolver::effective_permission_set(&grants);

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(user_id, &effective, self.cache_ttl).await {
                tracing::warn!(error = %e, %user_id, "Permission cache write failed");
            }
        }

        Ok(effective)
    }

    // ========================================================================
    // Decision
    // ========================================================================

    /// Check authorization, returning a bare allow/deny.
    pub async fn is_authorized(
        &self,
        user_id: Uuid,
        code: &str,
        policy: CheckPolicy,
        ctx: &AuditContext,
    ) -> bool {
        self.authorize(user_id, code, policy, ctx).await.is_ok()
    }

    /// Check authorization, returning the denial reason on refusal.
    ///
    /// Denials are always audited; allows only under
    /// [`CheckPolicy::Sensitive`].
    #[tracing::instrument(skip(self, ctx))]
    pub async fn authorize(
        &self,
        user_id: Uuid,
        code: &str,
        policy: CheckPolicy,
        ctx: &AuditContext,
    ) -> Result<(), Denied> {
        match self.decide(user_id, code).await {
            Ok(()) => {
                if policy == CheckPolicy::Sensitive {
                    self.audit(ctx.stamp(
                        NewAuditEntry::new(AuditAction::AccessGranted, "permission")
                            .target(code)
                            .new_values(serde_json::json!({ "user_id": user_id })),
                    ))
                    .await;
                }
                Ok(())
            }
            Err(reason) => {
                self.audit(
                    ctx.stamp(
                        NewAuditEntry::new(AuditAction::AccessDenied, "permission")
                            .target(code)
                            .new_values(serde_json::json!({
                                "user_id": user_id,
                                "reason": reason,
                            })),
                    ),
                )
                .await;
                Err(Denied::new(reason))
            }
        }
    }

    /// The decision rule. Fail-closed: every store failure maps to
    /// [`DenyReason::ResolutionError`].
    async fn decide(&self, user_id: Uuid, code: &str) -> Result<(), DenyReason> {
        let now = Utc::now();

        let user = match self.store.user_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(DenyReason::ResolutionError),
            Err(e) => {
                tracing::error!(error = %e, %user_id, "User lookup failed during authorization");
                return Err(DenyReason::ResolutionError);
            }
        };

        // Short-circuit before touching roles or the cache; the final
        // check_access repeats these gates as the single source of truth.
        if user.status != UserStatus::Active {
            return Err(DenyReason::UserInactive);
        }
        if user.is_locked(now) {
            return Err(DenyReason::Locked);
        }

        let code_exists = match self.store.permission_by_code(code).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::error!(error = %e, code, "Permission lookup failed during authorization");
                return Err(DenyReason::ResolutionError);
            }
        };

        let effective = match self.effective_for(user_id).await {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(error = %e, %user_id, "Permission resolution failed");
                return Err(DenyReason::ResolutionError);
            }
        };

        resolver::check_access(&user, &effective, code, code_exists, now)
    }

    // ========================================================================
    // Role-permission assignment
    // ========================================================================

    /// Grant a permission (by code) to a role. Idempotent: a repeat grant is
    /// a success no-op with no audit entry and no invalidation.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn assign_permission_to_role(
        &self,
        role_id: Uuid,
        code: &str,
        ctx: &AuditContext,
    ) -> Result<(), RbacError> {
        let role = self
            .store
            .role_by_id(role_id)
            .await?
            .ok_or(RbacError::NotFound("role"))?;
        let permission = self
            .store
            .permission_by_code(code)
            .await?
            .ok_or(RbacError::NotFound("permission"))?;

        let changed = self.store.grant_permission(role.id, permission.id).await?;
        if changed {
            self.audit(ctx.stamp(
                NewAuditEntry::new(AuditAction::PermissionGranted, "role")
                    .target(role.id)
                    .new_values(serde_json::json!({ "code": permission.code })),
            ))
            .await;
            self.invalidate_role_members(role.id).await;
        }

        Ok(())
    }

    /// Revoke a permission (by code) from a role. Idempotent: revoking a
    /// non-granted permission is a success no-op.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn revoke_permission_from_role(
        &self,
        role_id: Uuid,
        code: &str,
        ctx: &AuditContext,
    ) -> Result<(), RbacError> {
        let role = self
            .store
            .role_by_id(role_id)
            .await?
            .ok_or(RbacError::NotFound("role"))?;
        let permission = self
            .store
            .permission_by_code(code)
            .await?
            .ok_or(RbacError::NotFound("permission"))?;

        let changed = self.store.revoke_permission(role.id, permission.id).await?;
        if changed {
            self.audit(ctx.stamp(
                NewAuditEntry::new(AuditAction::PermissionRevoked, "role")
                    .target(role.id)
                    .old_values(serde_json::json!({ "code": permission.code })),
            ))
            .await;
            self.invalidate_role_members(role.id).await;
        }

        Ok(())
    }

    /// Assign a role to a user. Idempotent.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn assign_role_to_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        ctx: &AuditContext,
    ) -> Result<(), RbacError> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(RbacError::NotFound("user"))?;
        let role = self
            .store
            .role_by_id(role_id)
            .await?
            .ok_or(RbacError::NotFound("role"))?;

        let changed = self
            .store
            .assign_role(user_id, role.id, ctx.actor_id)
            .await?;
        if changed {
            self.audit(ctx.stamp(
                NewAuditEntry::new(AuditAction::RoleAssigned, "user")
                    .target(user_id)
                    .new_values(serde_json::json!({ "role": role.name })),
            ))
            .await;
            self.invalidate_user(user_id).await;
        }

        Ok(())
    }

    /// Remove a role from a user. Idempotent.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn remove_role_from_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        ctx: &AuditContext,
    ) -> Result<(), RbacError> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(RbacError::NotFound("user"))?;
        let role = self
            .store
            .role_by_id(role_id)
            .await?
            .ok_or(RbacError::NotFound("role"))?;

        let changed = self.store.unassign_role(user_id, role.id).await?;
        if changed {
            self.audit(ctx.stamp(
                NewAuditEntry::new(AuditAction::RoleRemoved, "user")
                    .target(user_id)
                    .old_values(serde_json::json!({ "role": role.name })),
            ))
            .await;
            self.invalidate_user(user_id).await;
        }

        Ok(())
    }

    // ========================================================================
    // Module hierarchy
    // ========================================================================

    /// Re-parent a module, rejecting any change that would create a cycle.
    ///
    /// Walks the ancestor chain of the new parent; if the module itself
    /// appears there (or is its own parent), the change is rejected. The
    /// walk carries a visited set so a pre-existing corrupt cycle terminates
    /// instead of looping.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn set_parent_module(
        &self,
        module_id: Uuid,
        parent_id: Option<Uuid>,
        ctx: &AuditContext,
    ) -> Result<(), RbacError> {
        let module = self
            .store
            .module_by_id(module_id)
            .await?
            .ok_or(RbacError::NotFound("module"))?;

        if let Some(new_parent_id) = parent_id {
            let parent = self
                .store
                .module_by_id(new_parent_id)
                .await?
                .ok_or(RbacError::NotFound("parent module"))?;

            let mut visited = HashSet::new();
            let mut cursor = Some(parent);
            while let Some(ancestor) = cursor {
                if ancestor.id == module_id {
                    return Err(RbacError::Cycle {
                        module_id,
                        parent_id: new_parent_id,
                    });
                }
                if !visited.insert(ancestor.id) {
                    break;
                }
                cursor = match ancestor.parent_id {
                    Some(next) => self.store.module_by_id(next).await?,
                    None => None,
                };
            }
        }

        self.store.set_module_parent(module_id, parent_id).await?;

        self.audit(ctx.stamp(
            NewAuditEntry::new(AuditAction::ModuleMoved, "module")
                .target(module_id)
                .old_values(serde_json::json!({ "parent_id": module.parent_id }))
                .new_values(serde_json::json!({ "parent_id": parent_id })),
        ))
        .await;

        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Invalidate the cached set for one user.
    async fn invalidate_user(&self, user_id: Uuid) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(user_id).await {
                tracing::warn!(error = %e, %user_id, "Permission cache invalidation failed");
            }
        }
    }

    /// Invalidate the cached sets for every user holding a role.
    ///
    /// Bulk, not lazy: a role-permission change must not leave stale grants
    /// readable for the cache TTL.
    async fn invalidate_role_members(&self, role_id: Uuid) {
        if self.cache.is_none() {
            return;
        }

        match self.store.users_with_role(role_id).await {
            Ok(user_ids) => {
                for user_id in user_ids {
                    self.invalidate_user(user_id).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, %role_id, "Failed to enumerate role members for cache invalidation");
            }
        }
    }

    /// Write an audit entry, logging (not propagating) failures.
    async fn audit(&self, entry: NewAuditEntry) {
        if let Err(e) = self.store.append_audit(entry).await {
            tracing::warn!(error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};

    use super::*;
    use crate::db::User;
    use crate::rbac::models::{Module, Permission, Role};
    use crate::rbac::store::StoreError;

    // ========================================================================
    // In-memory fakes
    // ========================================================================

    #[derive(Default)]
    struct MemInner {
        users: HashMap<Uuid, User>,
        roles: HashMap<Uuid, Role>,
        permissions: HashMap<Uuid, Permission>,
        role_permissions: HashSet<(Uuid, Uuid)>,
        user_roles: HashSet<(Uuid, Uuid)>,
        modules: HashMap<Uuid, Module>,
        audit: Vec<NewAuditEntry>,
    }

    #[derive(Clone, Default)]
    struct MemStore {
        inner: Arc<Mutex<MemInner>>,
    }

    impl MemStore {
        fn add_user(&self, status: UserStatus, lockout_until: Option<chrono::DateTime<Utc>>) -> Uuid {
            let id = Uuid::now_v7();
            let user = User {
                id,
                username: format!("user-{id}"),
                email: format!("{id}@example.com"),
                password_hash: "x".into(),
                status,
                email_confirmed: true,
                totp_secret: None,
                failed_login_count: 0,
                lockout_until,
                phone_number: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.inner.lock().unwrap().users.insert(id, user);
            id
        }

        fn add_role(&self, name: &str, active: bool) -> Uuid {
            let id = Uuid::now_v7();
            let role = Role {
                id,
                name: name.into(),
                description: None,
                active,
                is_default: false,
                priority: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.inner.lock().unwrap().roles.insert(id, role);
            id
        }

        fn add_permission(&self, code: &str) -> Uuid {
            let id = Uuid::now_v7();
            let permission = Permission {
                id,
                code: code.into(),
                name: code.into(),
                description: None,
                category: None,
                created_at: Utc::now(),
            };
            self.inner.lock().unwrap().permissions.insert(id, permission);
            id
        }

        fn add_module(&self, name: &str, parent_id: Option<Uuid>) -> Uuid {
            let id = Uuid::now_v7();
            let module = Module {
                id,
                name: name.into(),
                parent_id,
                kind: "feature".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            self.inner.lock().unwrap().modules.insert(id, module);
            id
        }

        fn grant(&self, role_id: Uuid, permission_id: Uuid) {
            self.inner
                .lock()
                .unwrap()
                .role_permissions
                .insert((role_id, permission_id));
        }

        fn assign(&self, user_id: Uuid, role_id: Uuid) {
            self.inner.lock().unwrap().user_roles.insert((user_id, role_id));
        }

        fn audit_count(&self, action: AuditAction) -> usize {
            self.inner
                .lock()
                .unwrap()
                .audit
                .iter()
                .filter(|e| e.action == action)
                .count()
        }
    }

    impl UserStore for MemStore {
        async fn user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
        }

        async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<Role>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .user_roles
                .iter()
                .filter(|(uid, _)| *uid == user_id)
                .filter_map(|(_, rid)| inner.roles.get(rid))
                .filter(|r| r.active)
                .cloned()
                .collect())
        }
    }

    impl RoleStore for MemStore {
        async fn role_by_id(&self, role_id: Uuid) -> Result<Option<Role>, StoreError> {
            Ok(self.inner.lock().unwrap().roles.get(&role_id).cloned())
        }

        async fn permission_by_code(&self, code: &str) -> Result<Option<Permission>, StoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .permissions
                .values()
                .find(|p| p.code == code)
                .cloned())
        }

        async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>, StoreError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner
                .role_permissions
                .iter()
                .filter(|(rid, _)| *rid == role_id)
                .filter_map(|(_, pid)| inner.permissions.get(pid))
                .cloned()
                .collect())
        }

        async fn grant_permission(
            &self,
            role_id: Uuid,
            permission_id: Uuid,
        ) -> Result<bool, StoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .role_permissions
                .insert((role_id, permission_id)))
        }

        async fn revoke_permission(
            &self,
            role_id: Uuid,
            permission_id: Uuid,
        ) -> Result<bool, StoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .role_permissions
                .remove(&(role_id, permission_id)))
        }

        async fn assign_role(
            &self,
            user_id: Uuid,
            role_id: Uuid,
            _assigned_by: Option<Uuid>,
        ) -> Result<bool, StoreError> {
            Ok(self.inner.lock().unwrap().user_roles.insert((user_id, role_id)))
        }

        async fn unassign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, StoreError> {
            Ok(self.inner.lock().unwrap().user_roles.remove(&(user_id, role_id)))
        }

        async fn users_with_role(&self, role_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .user_roles
                .iter()
                .filter(|(_, rid)| *rid == role_id)
                .map(|(uid, _)| *uid)
                .collect())
        }
    }

    impl ModuleStore for MemStore {
        async fn module_by_id(&self, module_id: Uuid) -> Result<Option<Module>, StoreError> {
            Ok(self.inner.lock().unwrap().modules.get(&module_id).cloned())
        }

        async fn set_module_parent(
            &self,
            module_id: Uuid,
            parent_id: Option<Uuid>,
        ) -> Result<(), StoreError> {
            if let Some(module) = self.inner.lock().unwrap().modules.get_mut(&module_id) {
                module.parent_id = parent_id;
            }
            Ok(())
        }
    }

    impl AuditSink for MemStore {
        async fn append_audit(&self, entry: NewAuditEntry) -> Result<(), StoreError> {
            self.inner.lock().unwrap().audit.push(entry);
            Ok(())
        }
    }

    /// Store whose every lookup fails, for fail-closed tests.
    #[derive(Clone)]
    struct FailingStore;

    impl UserStore for FailingStore {
        async fn user_by_id(&self, _user_id: Uuid) -> Result<Option<User>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn roles_for_user(&self, _user_id: Uuid) -> Result<Vec<Role>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    impl RoleStore for FailingStore {
        async fn role_by_id(&self, _role_id: Uuid) -> Result<Option<Role>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn permission_by_code(&self, _code: &str) -> Result<Option<Permission>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn permissions_for_role(&self, _role_id: Uuid) -> Result<Vec<Permission>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn grant_permission(
            &self,
            _role_id: Uuid,
            _permission_id: Uuid,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn revoke_permission(
            &self,
            _role_id: Uuid,
            _permission_id: Uuid,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn assign_role(
            &self,
            _user_id: Uuid,
            _role_id: Uuid,
            _assigned_by: Option<Uuid>,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn unassign_role(&self, _user_id: Uuid, _role_id: Uuid) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn users_with_role(&self, _role_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    impl ModuleStore for FailingStore {
        async fn module_by_id(&self, _module_id: Uuid) -> Result<Option<Module>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn set_module_parent(
            &self,
            _module_id: Uuid,
            _parent_id: Option<Uuid>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    impl AuditSink for FailingStore {
        async fn append_audit(&self, _entry: NewAuditEntry) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    /// In-memory [`PermissionCache`] for invalidation tests.
    #[derive(Clone, Default)]
    struct MemCache {
        entries: Arc<Mutex<HashMap<Uuid, HashSet<String>>>>,
    }

    impl PermissionCache for MemCache {
        async fn get(&self, user_id: Uuid) -> Result<Option<HashSet<String>>, StoreError> {
            Ok(self.entries.lock().unwrap().get(&user_id).cloned())
        }

        async fn put(
            &self,
            user_id: Uuid,
            permissions: &HashSet<String>,
            _ttl_secs: i64,
        ) -> Result<(), StoreError> {
            self.entries
                .lock()
                .unwrap()
                .insert(user_id, permissions.clone());
            Ok(())
        }

        async fn invalidate(&self, user_id: Uuid) -> Result<(), StoreError> {
            self.entries.lock().unwrap().remove(&user_id);
            Ok(())
        }
    }

    fn ctx() -> AuditContext {
        AuditContext::default()
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    #[tokio::test]
    async fn test_no_active_roles_resolves_to_empty_set() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let access = AccessControl::new(store);

        let set = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_union_over_roles() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let moderator = store.add_role("Moderator", true);
        let edit = store.add_permission("posts.edit");
        let delete = store.add_permission("comments.delete");
        store.grant(editor, edit);
        store.grant(moderator, delete);
        store.assign(alice, editor);
        store.assign(alice, moderator);
        let access = AccessControl::new(store);

        let set = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(set.contains("posts.edit"));
        assert!(set.contains("comments.delete"));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_resolution_unknown_user_is_not_found() {
        let store = MemStore::default();
        let access = AccessControl::new(store);

        let result = access.resolve_effective_permissions(Uuid::now_v7()).await;
        assert!(matches!(result, Err(RbacError::NotFound("user"))));
    }

    #[tokio::test]
    async fn test_soft_deleted_user_still_resolves() {
        let store = MemStore::default();
        let ghost = store.add_user(UserStatus::Deleted, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        store.assign(ghost, editor);
        let access = AccessControl::new(store);

        // Resolution succeeds; the decision layer is what denies.
        let set = access.resolve_effective_permissions(ghost).await.unwrap();
        assert!(set.contains("posts.edit"));
    }

    // ========================================================================
    // Decision
    // ========================================================================

    #[tokio::test]
    async fn test_alice_editor_scenario() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.add_permission("posts.delete");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::new(store);

        assert!(
            access
                .is_authorized(alice, "posts.edit", CheckPolicy::Routine, &ctx())
                .await
        );
        assert!(
            !access
                .is_authorized(alice, "posts.delete", CheckPolicy::Routine, &ctx())
                .await
        );
    }

    #[tokio::test]
    async fn test_blocked_user_denied_despite_grant() {
        let store = MemStore::default();
        let bob = store.add_user(UserStatus::Blocked, None);
        let admin = store.add_role("Admin", true);
        let manage = store.add_permission("users.manage");
        store.grant(admin, manage);
        store.assign(bob, admin);
        let access = AccessControl::new(store);

        let result = access
            .authorize(bob, "users.manage", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(result, Err(Denied::new(DenyReason::UserInactive)));
    }

    #[tokio::test]
    async fn test_locked_user_denied() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, Some(Utc::now() + Duration::minutes(10)));
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::new(store);

        let result = access
            .authorize(alice, "posts.edit", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(result, Err(Denied::new(DenyReason::Locked)));
    }

    #[tokio::test]
    async fn test_unknown_code_denied() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let access = AccessControl::new(store);

        let result = access
            .authorize(alice, "no.such.permission", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(result, Err(Denied::new(DenyReason::UnknownPermission)));
    }

    #[tokio::test]
    async fn test_fail_closed_on_store_error() {
        let access = AccessControl::new(FailingStore);

        let allowed = access
            .is_authorized(Uuid::now_v7(), "posts.edit", CheckPolicy::Routine, &ctx())
            .await;
        assert!(!allowed);

        let result = access
            .authorize(Uuid::now_v7(), "posts.edit", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(result, Err(Denied::new(DenyReason::ResolutionError)));
    }

    #[tokio::test]
    async fn test_missing_user_denied() {
        let store = MemStore::default();
        store.add_permission("posts.edit");
        let access = AccessControl::new(store);

        let result = access
            .authorize(Uuid::now_v7(), "posts.edit", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(result, Err(Denied::new(DenyReason::ResolutionError)));
    }

    #[tokio::test]
    async fn test_denial_is_audited_allow_is_not_for_routine() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::new(store.clone());

        access
            .authorize(alice, "posts.edit", CheckPolicy::Routine, &ctx())
            .await
            .unwrap();
        assert_eq!(store.audit_count(AuditAction::AccessGranted), 0);

        let _ = access
            .authorize(alice, "posts.missing", CheckPolicy::Routine, &ctx())
            .await;
        assert_eq!(store.audit_count(AuditAction::AccessDenied), 1);
    }

    #[tokio::test]
    async fn test_sensitive_allow_is_audited() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::new(store.clone());

        access
            .authorize(alice, "posts.edit", CheckPolicy::Sensitive, &ctx())
            .await
            .unwrap();
        assert_eq!(store.audit_count(AuditAction::AccessGranted), 1);
    }

    // ========================================================================
    // Assignment mutations
    // ========================================================================

    #[tokio::test]
    async fn test_assign_permission_is_idempotent() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        store.add_permission("posts.edit");
        store.assign(alice, editor);
        let access = AccessControl::new(store.clone());

        access
            .assign_permission_to_role(editor, "posts.edit", &ctx())
            .await
            .unwrap();
        access
            .assign_permission_to_role(editor, "posts.edit", &ctx())
            .await
            .unwrap();

        // One effective change, one audit entry, same resolved set.
        assert_eq!(store.audit_count(AuditAction::PermissionGranted), 1);
        let set = access.resolve_effective_permissions(alice).await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("posts.edit"));
    }

    #[tokio::test]
    async fn test_revoke_takes_effect_with_single_audit_entry() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::new(store.clone());

        assert!(
            access
                .is_authorized(alice, "posts.edit", CheckPolicy::Routine, &ctx())
                .await
        );

        access
            .revoke_permission_from_role(editor, "posts.edit", &ctx())
            .await
            .unwrap();
        // Second revoke is a no-op, not an error.
        access
            .revoke_permission_from_role(editor, "posts.edit", &ctx())
            .await
            .unwrap();

        assert!(
            !access
                .is_authorized(alice, "posts.edit", CheckPolicy::Routine, &ctx())
                .await
        );
        assert_eq!(store.audit_count(AuditAction::PermissionRevoked), 1);
    }

    #[tokio::test]
    async fn test_assign_role_unknown_role_is_not_found() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let access = AccessControl::new(store);

        let result = access
            .assign_role_to_user(alice, Uuid::now_v7(), &ctx())
            .await;
        assert!(matches!(result, Err(RbacError::NotFound("role"))));
    }

    #[tokio::test]
    async fn test_remove_role_is_idempotent() {
        let store = MemStore::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let access = AccessControl::new(store.clone());

        access
            .assign_role_to_user(alice, editor, &ctx())
            .await
            .unwrap();
        access
            .remove_role_from_user(alice, editor, &ctx())
            .await
            .unwrap();
        access
            .remove_role_from_user(alice, editor, &ctx())
            .await
            .unwrap();

        assert_eq!(store.audit_count(AuditAction::RoleRemoved), 1);
    }

    #[tokio::test]
    async fn test_role_permission_change_invalidates_role_members() {
        let store = MemStore::default();
        let cache = MemCache::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.add_permission("posts.delete");
        store.grant(editor, edit);
        store.assign(alice, editor);
        let access = AccessControl::with_cache(store, cache.clone(), 300);

        // Warm the cache.
        let before = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(!before.contains("posts.delete"));
        assert!(cache.entries.lock().unwrap().contains_key(&alice));

        // Granting to the role must bulk-invalidate every holder.
        access
            .assign_permission_to_role(editor, "posts.delete", &ctx())
            .await
            .unwrap();
        assert!(!cache.entries.lock().unwrap().contains_key(&alice));

        let after = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(after.contains("posts.delete"));
    }

    #[tokio::test]
    async fn test_user_role_change_invalidates_user() {
        let store = MemStore::default();
        let cache = MemCache::default();
        let alice = store.add_user(UserStatus::Active, None);
        let editor = store.add_role("Editor", true);
        let edit = store.add_permission("posts.edit");
        store.grant(editor, edit);
        let access = AccessControl::with_cache(store, cache.clone(), 300);

        let before = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(before.is_empty());

        access
            .assign_role_to_user(alice, editor, &ctx())
            .await
            .unwrap();

        let after = access.resolve_effective_permissions(alice).await.unwrap();
        assert!(after.contains("posts.edit"));
    }

    // ========================================================================
    // Module hierarchy
    // ========================================================================

    #[tokio::test]
    async fn test_reparenting_to_descendant_fails_with_cycle() {
        let store = MemStore::default();
        let a = store.add_module("content", None);
        let b = store.add_module("posts", None);
        let access = AccessControl::new(store);

        access.set_parent_module(a, Some(b), &ctx()).await.unwrap();

        let result = access.set_parent_module(b, Some(a), &ctx()).await;
        assert!(matches!(result, Err(RbacError::Cycle { .. })));
    }

    #[tokio::test]
    async fn test_module_cannot_be_its_own_parent() {
        let store = MemStore::default();
        let a = store.add_module("content", None);
        let access = AccessControl::new(store);

        let result = access.set_parent_module(a, Some(a), &ctx()).await;
        assert!(matches!(result, Err(RbacError::Cycle { .. })));
    }

    #[tokio::test]
    async fn test_deep_cycle_is_detected() {
        let store = MemStore::default();
        let a = store.add_module("a", None);
        let b = store.add_module("b", None);
        let c = store.add_module("c", None);
        let access = AccessControl::new(store);

        access.set_parent_module(b, Some(a), &ctx()).await.unwrap();
        access.set_parent_module(c, Some(b), &ctx()).await.unwrap();

        let result = access.set_parent_module(a, Some(c), &ctx()).await;
        assert!(matches!(result, Err(RbacError::Cycle { .. })));
    }

    #[tokio::test]
    async fn test_reparent_unknown_module_is_not_found() {
        let store = MemStore::default();
        let a = store.add_module("content", None);
        let access = AccessControl::new(store);

        let missing = Uuid::now_v7();
        assert!(matches!(
            access.set_parent_module(missing, Some(a), &ctx()).await,
            Err(RbacError::NotFound("module"))
        ));
        assert!(matches!(
            access.set_parent_module(a, Some(missing), &ctx()).await,
            Err(RbacError::NotFound("parent module"))
        ));
    }

    #[tokio::test]
    async fn test_clearing_parent_moves_module_to_root() {
        let store = MemStore::default();
        let a = store.add_module("content", None);
        let b = store.add_module("posts", None);
        let access = AccessControl::new(store.clone());

        access.set_parent_module(b, Some(a), &ctx()).await.unwrap();
        access.set_parent_module(b, None, &ctx()).await.unwrap();

        let module = store.inner.lock().unwrap().modules[&b].clone();
        assert_eq!(module.parent_id, None);
    }
}
