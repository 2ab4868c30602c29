//! Authentication Service
//!
//! Handles local authentication, account lifecycle, TOTP two-factor auth,
//! and session management.

mod error;
mod handlers;
pub mod jwt;
mod middleware;
mod password;
pub mod totp_crypto;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sha2::{Digest, Sha256};

use crate::api::AppState;

pub use error::{AuthError, AuthResult};
pub use middleware::{require_auth, AuthUser};
pub use password::{hash_password, verify_password};

/// SHA256-hash a token for storage; raw token values never touch the
/// database.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create authentication router.
///
/// Public routes (no auth required):
/// - POST /register - Register a new user
/// - POST /login - Login with username/password (+ TOTP code)
/// - POST /refresh - Rotate a refresh token
/// - POST /confirm-email - Confirm an email address
/// - POST /forgot-password - Request a password reset email
/// - POST /reset-password - Reset password with a mailed token
///
/// Protected routes (auth required):
/// - POST /logout - Invalidate a session
/// - GET /me - Current user profile
/// - POST /totp/setup - Begin two-factor enrollment
/// - POST /totp/verify - Complete two-factor enrollment
/// - POST /totp/disable - Disable two-factor auth
pub fn router(state: AppState) -> Router<AppState> {
    let public_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh_token))
        .route("/confirm-email", post(handlers::confirm_email))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/reset-password", post(handlers::reset_password));

    let protected_routes = Router::new()
        .route("/logout", post(handlers::logout))
        .route("/me", get(handlers::get_profile))
        .route("/totp/setup", post(handlers::totp_setup))
        .route("/totp/verify", post(handlers::totp_verify))
        .route("/totp/disable", post(handlers::totp_disable))
        .layer(axum_middleware::from_fn_with_state(state, require_auth));

    public_routes.merge(protected_routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = hash_token("some-token");
        let b = hash_token("some-token");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_token_differs_by_input() {
        assert_ne!(hash_token("token-a"), hash_token("token-b"));
    }
}
