//! RBAC Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::store::StoreError;

/// Errors surfaced by RBAC operations.
#[derive(Debug, Error)]
pub enum RbacError {
    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Re-parenting a module would create a cycle.
    #[error("setting module {parent_id} as parent of {module_id} would create a cycle")]
    Cycle { module_id: Uuid, parent_id: Uuid },

    /// Concurrent-mutation version mismatch.
    #[error("entity was modified concurrently")]
    Conflict,

    /// Entity is still referenced and cannot be removed.
    #[error("{0} is still referenced")]
    StillReferenced(&'static str),

    /// Request validation failure.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Repository or cache failure during permission computation.
    #[error("permission resolution failed")]
    Resolution(#[from] StoreError),
}

impl From<sqlx::Error> for RbacError {
    fn from(e: sqlx::Error) -> Self {
        Self::Resolution(StoreError::Database(e))
    }
}

/// Why an authorization check denied.
///
/// Returned to callers so clients get a precise reason without leaking
/// internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// User status is not `Active`.
    UserInactive,
    /// Account lockout is in effect.
    Locked,
    /// Permission code exists but the user does not hold it.
    PermissionMissing,
    /// Permission code does not exist. Fail-closed.
    UnknownPermission,
    /// A repository/cache failure occurred. Fail-closed.
    ResolutionError,
}

/// Denial outcome of [`authorize`](super::service::AccessControl::authorize).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Denied {
    pub reason: DenyReason,
}

impl Denied {
    #[must_use]
    pub const fn new(reason: DenyReason) -> Self {
        Self { reason }
    }
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Machine-readable error code.
    error: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for RbacError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Cycle { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "MODULE_CYCLE"),
            Self::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            Self::StillReferenced(_) => (StatusCode::CONFLICT, "STILL_REFERENCED"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Resolution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

impl IntoResponse for Denied {
    fn into_response(self) -> Response {
        let code = match self.reason {
            DenyReason::UserInactive => "USER_INACTIVE",
            DenyReason::Locked => "ACCOUNT_LOCKED",
            DenyReason::PermissionMissing => "PERMISSION_MISSING",
            DenyReason::UnknownPermission => "UNKNOWN_PERMISSION",
            DenyReason::ResolutionError => "RESOLUTION_ERROR",
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: "Access denied".to_string(),
        });

        (StatusCode::FORBIDDEN, body).into_response()
    }
}
