//! Authentication HTTP Handlers

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, Utc};
use fred::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;
use validator::Validate;

use super::error::{AuthError, AuthResult};
use super::hash_token;
use super::jwt::{generate_token_pair, validate_refresh_token, TokenPair};
use super::middleware::AuthUser;
use super::totp_crypto::{decrypt_totp_secret, encrypt_totp_secret};
use crate::api::AppState;
use crate::audit::{self, AuditAction, NewAuditEntry};
use crate::db::{
    self, TokenPurpose, UserStatus,
};
use crate::notify;
use crate::rbac::queries::get_default_roles;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Username (3-32 lowercase alphanumeric + underscore).
    #[validate(length(min = 3, max = 32), regex(path = *USERNAME_REGEX))]
    pub username: String,
    /// Email address.
    #[validate(email)]
    pub email: String,
    /// Password (8-128 characters).
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    /// Phone number for SMS notifications (optional).
    #[validate(length(max = 32))]
    pub phone_number: Option<String>,
}

/// Login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// TOTP code (required if two-factor auth is enabled).
    pub totp_code: Option<String>,
}

/// Token refresh request.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token.
    pub refresh_token: String,
}

/// Logout request.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    /// Refresh token to invalidate.
    pub refresh_token: String,
}

/// Authentication response with tokens.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    /// Access token (short-lived).
    pub access_token: String,
    /// Refresh token (long-lived).
    pub refresh_token: String,
    /// Access token expiry in seconds.
    pub expires_in: i64,
    /// Token type (always "Bearer").
    pub token_type: String,
}

/// User profile response.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    /// User ID.
    pub id: String,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Account status.
    pub status: UserStatus,
    /// Whether the email address is confirmed.
    pub email_confirmed: bool,
    /// Whether two-factor auth is enabled.
    pub totp_enabled: bool,
}

/// Two-factor setup response.
#[derive(Debug, Serialize)]
pub struct TotpSetupResponse {
    /// TOTP secret (base32-encoded).
    pub secret: String,
    /// otpauth:// URL for authenticator apps.
    pub otpauth_url: String,
}

/// Two-factor verification request.
#[derive(Debug, Deserialize)]
pub struct TotpVerifyRequest {
    /// 6-digit TOTP code.
    pub code: String,
}

/// Email confirmation request.
#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    /// Confirmation token from the email.
    pub token: String,
}

/// Password reset initiation request.
#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email)]
    pub email: String,
}

/// Password reset completion request.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    /// Reset token from the email.
    pub token: String,
    /// New password.
    pub new_password: String,
}

// ============================================================================
// Regex for validation
// ============================================================================

/// Username validation regex (matches DB constraint).
static USERNAME_REGEX: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"^[a-z0-9_]{3,32}$").unwrap());

// ============================================================================
// Helper Functions
// ============================================================================

/// Extract User-Agent from headers (sanitized and truncated to 512 chars).
fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|s| {
            s.chars()
                .filter(|c| !c.is_control() || c.is_whitespace())
                .take(512)
                .collect()
        })
}

/// Generate a random alphanumeric one-time token.
fn generate_one_time_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Redis key staging a TOTP secret between setup and verification.
fn totp_pending_key(user_id: Uuid) -> String {
    format!("totp_pending:{user_id}")
}

/// Build a TOTP instance for a base32 secret.
fn totp_instance(secret_base32: String, username: &str) -> AuthResult<TOTP> {
    let secret_bytes = Secret::Encoded(secret_base32)
        .to_bytes()
        .map_err(|e| AuthError::Internal(format!("Invalid TOTP secret: {e:?}")))?;

    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some("Bastion".to_string()),
        username.to_string(),
    )
    .map_err(|e| AuthError::Internal(format!("Failed to create TOTP: {e}")))
}

/// Decrypt a stored TOTP secret using the configured key.
fn decrypt_stored_totp(state: &AppState, encrypted: &str) -> AuthResult<String> {
    let key_hex = state
        .config
        .totp_encryption_key
        .as_ref()
        .ok_or_else(|| AuthError::Internal("TOTP encryption not configured".to_string()))?;
    let key = hex::decode(key_hex)
        .map_err(|_| AuthError::Internal("Invalid TOTP encryption key".to_string()))?;

    decrypt_totp_secret(encrypted, &key)
        .map_err(|e| AuthError::Internal(format!("Failed to decrypt TOTP secret: {e}")))
}

/// Create the session row for a freshly issued refresh token.
async fn store_session(
    state: &AppState,
    user_id: Uuid,
    tokens: &TokenPair,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> AuthResult<()> {
    let expires_at = Utc::now() + Duration::seconds(state.config.jwt_refresh_expiry);

    db::create_session(
        &state.db,
        tokens.refresh_token_id,
        user_id,
        &hash_token(&tokens.refresh_token),
        expires_at,
        ip_address,
        user_agent,
    )
    .await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new local user.
///
/// The account starts in `Registered` status with the active default roles
/// assigned. A confirmation email is queued; confirming promotes the account
/// to `Active`.
///
/// POST /auth/register
#[tracing::instrument(skip(state, body), fields(username = %body.username))]
pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> AuthResult<Json<AuthResponse>> {
    body.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    // Uniqueness checks (UNIQUE constraints catch races)
    if db::username_exists(&state.db, &body.username).await? {
        return Err(AuthError::UserAlreadyExists);
    }
    if db::email_exists(&state.db, &body.email).await? {
        return Err(AuthError::UserAlreadyExists);
    }

    let password_hash =
        super::password::hash_password(&body.password).map_err(|_| AuthError::PasswordHash)?;

    let default_roles = get_default_roles(&state.db).await?;

    // Transaction: first-user detection is serialized by an advisory lock so
    // two concurrent registrations cannot both (or neither) become the
    // bootstrap administrator.
    let mut tx = state.db.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(11)")
        .execute(&mut *tx)
        .await?;

    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    let is_first_user = user_count == 0;

    let user: crate::db::User = sqlx::query_as(
        r"
        INSERT INTO users (username, email, password_hash, phone_number)
        VALUES ($1, LOWER($2), $3, $4)
        RETURNING id, username, email, password_hash, status, email_confirmed,
                  totp_secret, failed_login_count, lockout_until, phone_number,
                  created_at, updated_at
        ",
    )
    .bind(&body.username)
    .bind(&body.email)
    .bind(&password_hash)
    .bind(body.phone_number.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    // Auto-assign the active default roles
    for role in &default_roles {
        sqlx::query(
            r"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
            ",
        )
        .bind(user.id)
        .bind(role.id)
        .execute(&mut *tx)
        .await?;
    }

    // Bootstrap: the first account becomes the administrator
    if is_first_user {
        sqlx::query(
            r"
            INSERT INTO user_roles (user_id, role_id)
            SELECT $1, id FROM roles WHERE name = 'Administrator'
            ON CONFLICT (user_id, role_id) DO NOTHING
            ",
        )
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        tracing::info!(user_id = %user.id, username = %user.username, "First user granted Administrator role");
    }

    tx.commit().await?;

    // Queue the confirmation email
    let raw_token = generate_one_time_token();
    let expires_at = Utc::now() + Duration::hours(state.config.confirmation_token_hours);
    db::create_account_token(
        &state.db,
        user.id,
        &hash_token(&raw_token),
        TokenPurpose::EmailConfirmation,
        expires_at,
    )
    .await?;

    if let Err(e) = notify::enqueue_email(
        &state.db,
        Some(user.id),
        &user.email,
        "Confirm your email address",
        &format!(
            "Welcome {username},\n\nYour confirmation code: {raw_token}\n\nThis code expires in {hours} hours.\n",
            username = user.username,
            hours = state.config.confirmation_token_hours,
        ),
    )
    .await
    {
        tracing::warn!(error = %e, user_id = %user.id, "Failed to queue confirmation email");
    }

    let user_agent = extract_user_agent(&headers);
    let ip = addr.ip().to_string();

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::UserRegistered, "user")
            .actor(user.id)
            .target(user.id)
            .new_values(serde_json::json!({
                "username": user.username,
                "default_roles": default_roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            }))
            .origin(Some(ip.clone()), user_agent.clone()),
    );

    let tokens = generate_token_pair(
        user.id,
        &state.config.jwt_secret,
        state.config.jwt_access_expiry,
        state.config.jwt_refresh_expiry,
    )?;
    store_session(&state, user.id, &tokens, Some(&ip), user_agent.as_deref()).await?;

    tracing::info!(user_id = %user.id, username = %user.username, "User registered");

    Ok(Json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.access_expires_in,
        token_type: "Bearer".to_string(),
    }))
}

/// Login with username/password (and TOTP code when enabled).
///
/// Repeated failures count toward the lockout threshold; a triggered lockout
/// is audited and a notification is queued.
///
/// POST /auth/login
#[tracing::instrument(skip(state, body), fields(username = %body.username))]
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let user_agent = extract_user_agent(&headers);
    let ip = addr.ip().to_string();

    let Some(user) = db::find_user_by_username(&state.db, &body.username).await? else {
        return Err(AuthError::InvalidCredentials);
    };

    // Lockout gate before any credential work
    if user.is_locked(Utc::now()) {
        audit::record(
            &state.db,
            NewAuditEntry::new(AuditAction::LoginFailed, "user")
                .target(user.id)
                .new_values(serde_json::json!({ "reason": "locked" }))
                .origin(Some(ip.clone()), user_agent.clone()),
        );
        return Err(AuthError::AccountLocked);
    }

    let valid = super::password::verify_password(&body.password, &user.password_hash)
        .map_err(|_| AuthError::PasswordHash)?;

    if !valid {
        let locked_until = db::record_login_failure(
            &state.db,
            user.id,
            state.config.max_failed_logins,
            state.config.lockout_minutes,
        )
        .await?;

        audit::record(
            &state.db,
            NewAuditEntry::new(AuditAction::LoginFailed, "user")
                .target(user.id)
                .new_values(serde_json::json!({ "reason": "bad_password" }))
                .origin(Some(ip.clone()), user_agent.clone()),
        );

        if let Some(until) = locked_until {
            audit::record(
                &state.db,
                NewAuditEntry::new(AuditAction::AccountLocked, "user")
                    .target(user.id)
                    .new_values(serde_json::json!({ "lockout_until": until }))
                    .origin(Some(ip.clone()), user_agent.clone()),
            );

            if let Err(e) = notify::enqueue_email(
                &state.db,
                Some(user.id),
                &user.email,
                "Account temporarily locked",
                &format!(
                    "Hello {username},\n\nYour account was locked after repeated failed sign-in attempts.\nYou can try again after {until}.\n\nIf this wasn't you, please reset your password.\n",
                    username = user.username,
                ),
            )
            .await
            {
                tracing::warn!(error = %e, user_id = %user.id, "Failed to queue lockout email");
            }

            return Err(AuthError::AccountLocked);
        }

        return Err(AuthError::InvalidCredentials);
    }

    // Status gate: Blocked/Suspended/Deleted accounts cannot sign in
    if matches!(
        user.status,
        UserStatus::Blocked | UserStatus::Suspended | UserStatus::Deleted
    ) {
        return Err(AuthError::AccountInactive);
    }

    // Two-factor check if enabled
    if let Some(ref encrypted_secret) = user.totp_secret {
        let code = body.totp_code.as_ref().ok_or(AuthError::TotpRequired)?;

        let secret = decrypt_stored_totp(&state, encrypted_secret)?;
        let totp = totp_instance(secret, &user.username)?;

        let code_ok = totp
            .check_current(code)
            .map_err(|e| AuthError::Internal(format!("Failed to verify TOTP code: {e}")))?;

        if !code_ok {
            audit::record(
                &state.db,
                NewAuditEntry::new(AuditAction::LoginFailed, "user")
                    .target(user.id)
                    .new_values(serde_json::json!({ "reason": "bad_totp" }))
                    .origin(Some(ip.clone()), user_agent.clone()),
            );
            return Err(AuthError::InvalidTotpCode);
        }
    }

    db::reset_login_failures(&state.db, user.id).await?;

    let tokens = generate_token_pair(
        user.id,
        &state.config.jwt_secret,
        state.config.jwt_access_expiry,
        state.config.jwt_refresh_expiry,
    )?;
    store_session(&state, user.id, &tokens, Some(&ip), user_agent.as_deref()).await?;

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::LoginSucceeded, "user")
            .actor(user.id)
            .target(user.id)
            .origin(Some(ip), user_agent),
    );

    Ok(Json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.access_expires_in,
        token_type: "Bearer".to_string(),
    }))
}

/// Rotate a refresh token into a new token pair.
///
/// The presented token's session is deleted and replaced, so a stolen
/// refresh token stops working after its first use by the legitimate client.
///
/// POST /auth/refresh
#[tracing::instrument(skip(state, body))]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AuthResult<Json<AuthResponse>> {
    let claims = validate_refresh_token(&body.refresh_token, &state.config.jwt_secret)?;
    let user_id: Uuid = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;

    let token_hash = hash_token(&body.refresh_token);
    let session = db::find_session_by_token_hash(&state.db, &token_hash)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if session.user_id != user_id {
        return Err(AuthError::InvalidToken);
    }

    let user = db::find_user_by_id(&state.db, user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    if user.status == UserStatus::Deleted {
        return Err(AuthError::UserNotFound);
    }

    // Rotation: old session out, new session in
    db::delete_session_by_token_hash(&state.db, &token_hash).await?;

    let tokens = generate_token_pair(
        user.id,
        &state.config.jwt_secret,
        state.config.jwt_access_expiry,
        state.config.jwt_refresh_expiry,
    )?;
    store_session(
        &state,
        user.id,
        &tokens,
        session.ip_address.as_deref(),
        session.user_agent.as_deref(),
    )
    .await?;

    Ok(Json(AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.access_expires_in,
        token_type: "Bearer".to_string(),
    }))
}

/// Invalidate a refresh token's session.
///
/// POST /auth/logout
#[tracing::instrument(skip(state, body))]
pub async fn logout(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<LogoutRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    db::delete_session_by_token_hash(&state.db, &hash_token(&body.refresh_token)).await?;

    tracing::debug!(user_id = %auth_user.id, "User logged out");

    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}

/// Get the current user's profile.
///
/// GET /auth/me
pub async fn get_profile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AuthResult<Json<UserProfile>> {
    let user = db::find_user_by_id(&state.db, auth_user.id)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    Ok(Json(UserProfile {
        id: user.id.to_string(),
        username: user.username,
        email: user.email,
        status: user.status,
        email_confirmed: user.email_confirmed,
        totp_enabled: user.totp_secret.is_some(),
    }))
}

/// Confirm an email address with a mailed token.
///
/// A `Registered` account is promoted to `Active`.
///
/// POST /auth/confirm-email
#[tracing::instrument(skip(state, body))]
pub async fn confirm_email(
    State(state): State<AppState>,
    Json(body): Json<ConfirmEmailRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    let token = db::find_valid_account_token(
        &state.db,
        &hash_token(&body.token),
        TokenPurpose::EmailConfirmation,
    )
    .await?
    .ok_or(AuthError::InvalidToken)?;

    db::mark_account_token_used(&state.db, token.id).await?;

    let user = db::confirm_user_email(&state.db, token.user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::EmailConfirmed, "user")
            .actor(user.id)
            .target(user.id)
            .new_values(serde_json::json!({ "status": user.status })),
    );

    tracing::info!(user_id = %user.id, "Email confirmed");

    Ok(Json(
        serde_json::json!({ "message": "Email confirmed. Your account is now active." }),
    ))
}

/// Request a password reset email.
///
/// POST /auth/forgot-password
#[tracing::instrument(skip(state, body))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    body.validate()
        .map_err(|e| AuthError::Validation(e.to_string()))?;

    if let Some(user) = db::find_user_by_email(&state.db, &body.email).await? {
        if user.status != UserStatus::Deleted {
            let raw_token = generate_one_time_token();
            let expires_at = Utc::now() + Duration::minutes(state.config.reset_token_minutes);

            db::create_account_token(
                &state.db,
                user.id,
                &hash_token(&raw_token),
                TokenPurpose::PasswordReset,
                expires_at,
            )
            .await?;

            if let Err(e) = notify::enqueue_email(
                &state.db,
                Some(user.id),
                &user.email,
                "Password Reset Request",
                &format!(
                    "Hello {username},\n\nYour reset code: {raw_token}\n\nThis code expires in {minutes} minutes.\nIf you did not request this, you can safely ignore this email.\n",
                    username = user.username,
                    minutes = state.config.reset_token_minutes,
                ),
            )
            .await
            {
                tracing::warn!(error = %e, user_id = %user.id, "Failed to queue reset email");
            }
        }
    }

    // Always return a generic message to prevent user enumeration
    Ok(Json(serde_json::json!({
        "message": "If an account with that email exists, a reset code has been sent."
    })))
}

/// Reset password using a reset token.
///
/// POST /auth/reset-password
#[tracing::instrument(skip(state, body))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    if body.new_password.len() < 8 || body.new_password.len() > 128 {
        return Err(AuthError::Validation(
            "Password must be between 8 and 128 characters".to_string(),
        ));
    }

    let token = db::find_valid_account_token(
        &state.db,
        &hash_token(&body.token),
        TokenPurpose::PasswordReset,
    )
    .await?
    .ok_or(AuthError::InvalidToken)?;

    let password_hash =
        super::password::hash_password(&body.new_password).map_err(|_| AuthError::PasswordHash)?;

    db::mark_account_token_used(&state.db, token.id).await?;
    db::update_password_hash(&state.db, token.user_id, &password_hash).await?;
    db::reset_login_failures(&state.db, token.user_id).await?;

    // Force re-login everywhere
    let revoked = db::delete_sessions_for_user(&state.db, token.user_id).await?;

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::PasswordChanged, "user")
            .actor(token.user_id)
            .target(token.user_id)
            .new_values(serde_json::json!({ "sessions_revoked": revoked })),
    );

    tracing::info!(user_id = %token.user_id, "Password reset, all sessions invalidated");

    Ok(Json(serde_json::json!({
        "message": "Password has been reset successfully. Please log in with your new password."
    })))
}

/// Begin two-factor enrollment.
///
/// Generates a TOTP secret, stages it (encrypted) in Redis for ten minutes,
/// and returns the secret and otpauth URL. Nothing is enabled until the
/// user proves possession via `/auth/totp/verify`.
///
/// POST /auth/totp/setup
#[tracing::instrument(skip(state))]
pub async fn totp_setup(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AuthResult<Json<TotpSetupResponse>> {
    let key_hex = state
        .config
        .totp_encryption_key
        .as_ref()
        .ok_or_else(|| AuthError::Internal("TOTP encryption not configured".to_string()))?;
    let key = hex::decode(key_hex)
        .map_err(|_| AuthError::Internal("Invalid TOTP encryption key".to_string()))?;

    // 20 random bytes = 160 bits, the standard TOTP secret size
    let secret = Secret::default();
    let secret_base32 = secret.to_encoded().to_string();

    let encrypted = encrypt_totp_secret(&secret_base32, &key)
        .map_err(|e| AuthError::Internal(format!("Failed to encrypt TOTP secret: {e}")))?;

    let _: () = state
        .redis
        .set(
            totp_pending_key(auth_user.id),
            encrypted,
            Some(Expiration::EX(600)),
            None,
            false,
        )
        .await
        .map_err(|e| AuthError::Internal(format!("Failed to stage TOTP secret: {e}")))?;

    let totp = totp_instance(secret_base32.clone(), &auth_user.username)?;

    Ok(Json(TotpSetupResponse {
        secret: secret_base32,
        otpauth_url: totp.get_url(),
    }))
}

/// Complete two-factor enrollment by verifying a code against the staged
/// secret.
///
/// POST /auth/totp/verify
#[tracing::instrument(skip(state, body))]
pub async fn totp_verify(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<TotpVerifyRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    let staged: Option<String> = state
        .redis
        .get(totp_pending_key(auth_user.id))
        .await
        .map_err(|e| AuthError::Internal(format!("Failed to load staged TOTP secret: {e}")))?;

    let encrypted = staged.ok_or(AuthError::InvalidToken)?;

    let secret = decrypt_stored_totp(&state, &encrypted)?;
    let totp = totp_instance(secret, &auth_user.username)?;

    let code_ok = totp
        .check_current(&body.code)
        .map_err(|e| AuthError::Internal(format!("Failed to verify TOTP code: {e}")))?;
    if !code_ok {
        return Err(AuthError::InvalidTotpCode);
    }

    db::set_totp_secret(&state.db, auth_user.id, Some(&encrypted)).await?;

    let _: () = state
        .redis
        .del(totp_pending_key(auth_user.id))
        .await
        .unwrap_or(());

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::TotpEnabled, "user")
            .actor(auth_user.id)
            .target(auth_user.id),
    );

    tracing::info!(user_id = %auth_user.id, "Two-factor auth enabled");

    Ok(Json(
        serde_json::json!({ "message": "Two-factor authentication enabled" }),
    ))
}

/// Disable two-factor auth, verifying a current code first.
///
/// POST /auth/totp/disable
#[tracing::instrument(skip(state, body))]
pub async fn totp_disable(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(body): Json<TotpVerifyRequest>,
) -> AuthResult<Json<serde_json::Value>> {
    let user = db::find_user_by_id(&state.db, auth_user.id)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    let encrypted = user.totp_secret.as_ref().ok_or(AuthError::InvalidToken)?;
    let secret = decrypt_stored_totp(&state, encrypted)?;
    let totp = totp_instance(secret, &user.username)?;

    let code_ok = totp
        .check_current(&body.code)
        .map_err(|e| AuthError::Internal(format!("Failed to verify TOTP code: {e}")))?;
    if !code_ok {
        return Err(AuthError::InvalidTotpCode);
    }

    db::set_totp_secret(&state.db, user.id, None).await?;

    audit::record(
        &state.db,
        NewAuditEntry::new(AuditAction::TotpDisabled, "user")
            .actor(user.id)
            .target(user.id),
    );

    tracing::info!(user_id = %user.id, "Two-factor auth disabled");

    Ok(Json(
        serde_json::json!({ "message": "Two-factor authentication disabled" }),
    ))
}
