//! Permission resolution logic.
//!
//! Computes the effective permission set for a user and decides access for a
//! requested permission code. Both functions are pure: loading roles and
//! permission rows is the store's job, so the security-critical logic here
//! is testable without a database.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::db::{User, UserStatus};

use super::error::DenyReason;
use super::models::{Permission, Role};

/// Compute the effective permission set from a user's role grants.
///
/// The result is the union of permission codes over all *active* roles.
/// Set semantics: no ordering dependency, and role priority never excludes
/// a grant. Inactive roles contribute nothing even if the store returned
/// them.
#[must_use]
pub fn effective_permission_set(grants: &[(Role, Vec<Permission>)]) -> HashSet<String> {
    grants
        .iter()
        .filter(|(role, _)| role.active)
        .flat_map(|(_, permissions)| permissions.iter().map(|p| p.code.clone()))
        .collect()
}

/// Decide access for a requested permission code.
///
/// Check order:
/// 1. User status must be `Active`
/// 2. No lockout in effect
/// 3. The code must name an existing permission (unknown codes deny)
/// 4. The code must be in the user's effective set
///
/// Store failures never reach this function; the service maps them to
/// [`DenyReason::ResolutionError`] before the check runs.
pub fn check_access(
    user: &User,
    effective: &HashSet<String>,
    code: &str,
    code_exists: bool,
    now: DateTime<Utc>,
) -> Result<(), DenyReason> {
    if user.status != UserStatus::Active {
        return Err(DenyReason::UserInactive);
    }

    if user.is_locked(now) {
        return Err(DenyReason::Locked);
    }

    if code.is_empty() || !code_exists {
        return Err(DenyReason::UnknownPermission);
    }

    if !effective.contains(code) {
        return Err(DenyReason::PermissionMissing);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn role(name: &str, active: bool) -> Role {
        Role {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            active,
            is_default: false,
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn permission(code: &str) -> Permission {
        Permission {
            id: Uuid::now_v7(),
            code: code.to_string(),
            name: code.to_string(),
            description: None,
            category: None,
            created_at: Utc::now(),
        }
    }

    fn user(status: UserStatus, lockout_until: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::now_v7(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "x".into(),
            status,
            email_confirmed: true,
            totp_secret: None,
            failed_login_count: 0,
            lockout_until,
            phone_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn codes(set: &HashSet<String>) -> Vec<&str> {
        let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_no_roles_yields_empty_set() {
        let set = effective_permission_set(&[]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_union_across_roles() {
        let grants = vec![
            (
                role("Editor", true),
                vec![permission("posts.edit"), permission("posts.view")],
            ),
            (
                role("Moderator", true),
                vec![permission("posts.view"), permission("comments.delete")],
            ),
        ];

        let set = effective_permission_set(&grants);

        assert_eq!(
            codes(&set),
            vec!["comments.delete", "posts.edit", "posts.view"]
        );
    }

    #[test]
    fn test_inactive_role_contributes_nothing() {
        let grants = vec![
            (role("Editor", true), vec![permission("posts.edit")]),
            (role("Legacy", false), vec![permission("users.delete")]),
        ];

        let set = effective_permission_set(&grants);

        assert!(set.contains("posts.edit"));
        assert!(!set.contains("users.delete"));
    }

    #[test]
    fn test_union_is_order_independent() {
        let a = (role("A", true), vec![permission("x.read")]);
        let b = (role("B", true), vec![permission("y.write")]);

        let forward = effective_permission_set(&[a.clone(), b.clone()]);
        let reverse = effective_permission_set(&[b, a]);

        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_superset_of_each_role() {
        let editor = (role("Editor", true), vec![permission("posts.edit")]);
        let admin = (
            role("Admin", true),
            vec![permission("users.manage"), permission("posts.edit")],
        );

        let set = effective_permission_set(&[editor.clone(), admin.clone()]);

        for (_, perms) in [&editor, &admin] {
            for p in perms {
                assert!(set.contains(&p.code));
            }
        }
    }

    #[test]
    fn test_allow_when_active_and_granted() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, None);
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&alice, &effective, "posts.edit", true, now),
            Ok(())
        );
    }

    #[test]
    fn test_deny_permission_not_granted() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, None);
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&alice, &effective, "posts.delete", true, now),
            Err(DenyReason::PermissionMissing)
        );
    }

    #[test]
    fn test_status_gate_overrides_grant() {
        // Blocked user holding the permission is still denied
        let now = Utc::now();
        let bob = user(UserStatus::Blocked, None);
        let effective: HashSet<String> = ["users.manage".to_string()].into();

        assert_eq!(
            check_access(&bob, &effective, "users.manage", true, now),
            Err(DenyReason::UserInactive)
        );
    }

    #[test]
    fn test_deleted_user_denied() {
        let now = Utc::now();
        let ghost = user(UserStatus::Deleted, None);
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&ghost, &effective, "posts.edit", true, now),
            Err(DenyReason::UserInactive)
        );
    }

    #[test]
    fn test_active_lockout_denies() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, Some(now + Duration::minutes(10)));
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&alice, &effective, "posts.edit", true, now),
            Err(DenyReason::Locked)
        );
    }

    #[test]
    fn test_expired_lockout_does_not_deny() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, Some(now - Duration::minutes(10)));
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&alice, &effective, "posts.edit", true, now),
            Ok(())
        );
    }

    #[test]
    fn test_unknown_code_denies() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, None);
        let effective: HashSet<String> = ["posts.edit".to_string()].into();

        assert_eq!(
            check_access(&alice, &effective, "posts.destroy", false, now),
            Err(DenyReason::UnknownPermission)
        );
    }

    #[test]
    fn test_empty_code_denies() {
        let now = Utc::now();
        let alice = user(UserStatus::Active, None);

        assert_eq!(
            check_access(&alice, &HashSet::new(), "", true, now),
            Err(DenyReason::UnknownPermission)
        );
    }
}
