//! Permission-gating middleware.
//!
//! Explicit route gates: the required permission code is plain configuration
//! attached where the router is built, and every request through the gate
//! goes to [`AccessControl::authorize`](super::service::AccessControl::authorize).

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::USER_AGENT,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::auth::AuthUser;

use super::service::{AuditContext, CheckPolicy};

/// Build a middleware that requires the authenticated user to hold `code`.
///
/// Must run after `auth::require_auth` so `AuthUser` is present. Admin
/// routes are gated as sensitive checks, so allowed requests are audited
/// along with denials.
///
/// # Example
///
/// ```ignore
/// Router::new()
///     .route("/roles", post(create_role))
///     .layer(from_fn_with_state(state.clone(), require_permission("roles.manage")))
///     .layer(from_fn_with_state(state.clone(), auth::require_auth))
/// ```
pub fn require_permission(
    code: &'static str,
) -> impl Fn(
    State<AppState>,
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>>
       + Clone
       + Send
       + 'static {
    move |State(state): State<AppState>, request: Request, next: Next| {
        Box::pin(async move {
            let Some(auth) = request.extensions().get::<AuthUser>().cloned() else {
                return crate::auth::AuthError::MissingAuthHeader.into_response();
            };

            let ctx = audit_context_for(&auth, &request);

            match state
                .access
                .authorize(auth.id, code, CheckPolicy::Sensitive, &ctx)
                .await
            {
                Ok(()) => next.run(request).await,
                Err(denied) => denied.into_response(),
            }
        })
    }
}

/// Build the audit context from request metadata.
fn audit_context_for(auth: &AuthUser, request: &Request) -> AuditContext {
    let ip_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.chars().take(512).collect());

    AuditContext {
        actor_id: Some(auth.id),
        ip_address,
        user_agent,
    }
}
