//! Administration API
//!
//! Role, permission, module, and user management. Each route group is gated
//! by an explicit permission code; the codes are plain configuration wired
//! here, not metadata on the handlers.

mod handlers;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, put},
    Router,
};

use crate::api::AppState;
use crate::rbac::require_permission;

pub use handlers::{AdminUserView, EffectivePermissionsResponse};

/// Create the admin router.
///
/// Callers must layer `auth::require_auth` on top; the permission gates
/// here assume an authenticated user is present.
pub fn router(state: AppState) -> Router<AppState> {
    let user_routes = Router::new()
        .route("/users", get(handlers::list_users))
        .route(
            "/users/{id}",
            get(handlers::get_user).delete(handlers::delete_user),
        )
        .route("/users/{id}/status", put(handlers::set_user_status))
        .route("/users/{id}/permissions", get(handlers::get_user_permissions))
        .route(
            "/users/{user_id}/roles/{role_id}",
            put(handlers::assign_role_to_user).delete(handlers::remove_role_from_user),
        )
        .layer(from_fn_with_state(
            state.clone(),
            require_permission("users.manage"),
        ));

    let role_routes = Router::new()
        .route(
            "/roles",
            get(handlers::list_roles).post(handlers::create_role),
        )
        .route(
            "/roles/{id}",
            put(handlers::update_role).delete(handlers::delete_role),
        )
        .route("/roles/{id}/permissions", get(handlers::list_role_permissions))
        .route(
            "/roles/{id}/permissions/{code}",
            put(handlers::grant_permission_to_role)
                .delete(handlers::revoke_permission_from_role),
        )
        .layer(from_fn_with_state(
            state.clone(),
            require_permission("roles.manage"),
        ));

    let permission_routes = Router::new()
        .route(
            "/permissions",
            get(handlers::list_permissions).post(handlers::create_permission),
        )
        .route("/permissions/{id}", put(handlers::update_permission))
        .layer(from_fn_with_state(
            state.clone(),
            require_permission("permissions.manage"),
        ));

    let module_routes = Router::new()
        .route(
            "/modules",
            get(handlers::list_modules).post(handlers::create_module),
        )
        .route("/modules/{id}/parent", put(handlers::set_module_parent))
        .layer(from_fn_with_state(
            state.clone(),
            require_permission("modules.manage"),
        ));

    let audit_routes = Router::new()
        .route("/audit", get(handlers::list_audit_log))
        .layer(from_fn_with_state(
            state,
            require_permission("audit.read"),
        ));

    user_routes
        .merge(role_routes)
        .merge(permission_routes)
        .merge(module_routes)
        .merge(audit_routes)
}
