//! Role-based access control.
//!
//! Effective permissions are the union of permission codes over a user's
//! active roles; authorization is a fail-closed check of a requested code
//! against that set, gated by account status and lockout.

pub mod cache;
pub mod error;
pub mod middleware;
pub mod models;
pub mod queries;
pub mod resolver;
pub mod service;
pub mod store;

pub use cache::RedisPermissionCache;
pub use error::{Denied, DenyReason, RbacError};
pub use middleware::require_permission;
pub use models::*;
pub use queries::PgStore;
pub use resolver::{check_access, effective_permission_set};
pub use service::{AccessControl, AuditContext, CheckPolicy};
pub use store::{AuditSink, ModuleStore, PermissionCache, RoleStore, StoreError, UserStore};

/// Production access-control service type used in `AppState`.
pub type Access = AccessControl<PgStore, RedisPermissionCache>;
