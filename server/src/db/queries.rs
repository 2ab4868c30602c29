//! Database queries for accounts, sessions, and one-time tokens.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{AccountToken, Session, TokenPurpose, User, UserStatus};

const USER_COLUMNS: &str = "id, username, email, password_hash, status, email_confirmed, \
     totp_secret, failed_login_count, lockout_until, phone_number, created_at, updated_at";

// ============================================================================
// User Queries
// ============================================================================

/// Find a user by ID.
pub async fn find_user_by_id(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Find a user by username.
pub async fn find_user_by_username(pool: &PgPool, username: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await
}

/// Find a user by email (case-insensitive).
pub async fn find_user_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Check if a username is taken.
pub async fn username_exists(pool: &PgPool, username: &str) -> sqlx::Result<bool> {
    let result: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
        .bind(username)
        .fetch_one(pool)
        .await?;

    Ok(result.0)
}

/// Check if an email is taken (case-insensitive).
pub async fn email_exists(pool: &PgPool, email: &str) -> sqlx::Result<bool> {
    let result: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($1))")
            .bind(email)
            .fetch_one(pool)
            .await?;

    Ok(result.0)
}

/// Update a user's lifecycle status.
///
/// Returns the updated row, or `None` if the user does not exist.
pub async fn update_user_status(
    pool: &PgPool,
    user_id: Uuid,
    status: UserStatus,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users
         SET status = $2, updated_at = NOW()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    ))
    .bind(user_id)
    .bind(status)
    .fetch_optional(pool)
    .await
}

/// Record a failed login attempt.
///
/// Increments the failure counter and, once it reaches `max_failures`, sets
/// `lockout_until` and resets the counter. Returns the new lockout timestamp
/// if this attempt triggered a lockout.
pub async fn record_login_failure(
    pool: &PgPool,
    user_id: Uuid,
    max_failures: i32,
    lockout_minutes: i64,
) -> sqlx::Result<Option<DateTime<Utc>>> {
    let lockout_until = Utc::now() + Duration::minutes(lockout_minutes);

    let row: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
        r"
        UPDATE users
        SET failed_login_count = CASE
                WHEN failed_login_count + 1 >= $2 THEN 0
                ELSE failed_login_count + 1
            END,
            lockout_until = CASE
                WHEN failed_login_count + 1 >= $2 THEN $3
                ELSE lockout_until
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING CASE WHEN failed_login_count = 0 THEN lockout_until END
        ",
    )
    .bind(user_id)
    .bind(max_failures)
    .bind(lockout_until)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(locked,)| locked))
}

/// Clear the failure counter after a successful login.
pub async fn reset_login_failures(pool: &PgPool, user_id: Uuid) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE users
        SET failed_login_count = 0, lockout_until = NULL, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store or clear the (encrypted) TOTP secret.
pub async fn set_totp_secret(
    pool: &PgPool,
    user_id: Uuid,
    secret: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE users
        SET totp_secret = $2, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .bind(secret)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark the user's email as confirmed.
///
/// A `Registered` account is promoted to `Active`; other statuses keep their
/// status and only gain the confirmed flag.
pub async fn confirm_user_email(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(&format!(
        "UPDATE users
         SET email_confirmed = TRUE,
             status = CASE WHEN status = 'registered' THEN 'active'::user_status ELSE status END,
             updated_at = NOW()
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Replace the user's password hash.
pub async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
        ",
    )
    .bind(user_id)
    .bind(password_hash)
    .execute(pool)
    .await?;

    Ok(())
}

/// List users with pagination.
pub async fn list_users(pool: &PgPool, limit: i64, offset: i64) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Session Queries
// ============================================================================

/// Create a session row for a refresh token.
pub async fn create_session(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> sqlx::Result<Session> {
    sqlx::query_as::<_, Session>(
        r"
        INSERT INTO sessions (id, user_id, token_hash, expires_at, ip_address, user_agent)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, user_id, token_hash, expires_at, ip_address, user_agent, created_at
        ",
    )
    .bind(session_id)
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(pool)
    .await
}

/// Find a live session by refresh-token hash.
pub async fn find_session_by_token_hash(
    pool: &PgPool,
    token_hash: &str,
) -> sqlx::Result<Option<Session>> {
    sqlx::query_as::<_, Session>(
        r"
        SELECT id, user_id, token_hash, expires_at, ip_address, user_agent, created_at
        FROM sessions
        WHERE token_hash = $1
          AND expires_at > NOW()
        ",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Delete a session by refresh-token hash (logout / rotation).
///
/// Returns `true` if a session was deleted.
pub async fn delete_session_by_token_hash(pool: &PgPool, token_hash: &str) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every session for a user (status change, password reset).
pub async fn delete_sessions_for_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Account Token Queries
// ============================================================================

/// Create a one-time account token, invalidating earlier tokens of the same purpose.
pub async fn create_account_token(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &str,
    purpose: TokenPurpose,
    expires_at: DateTime<Utc>,
) -> sqlx::Result<AccountToken> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        UPDATE account_tokens
        SET used_at = NOW()
        WHERE user_id = $1
          AND purpose = $2
          AND used_at IS NULL
        ",
    )
    .bind(user_id)
    .bind(purpose)
    .execute(&mut *tx)
    .await?;

    let token = sqlx::query_as::<_, AccountToken>(
        r"
        INSERT INTO account_tokens (user_id, token_hash, purpose, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, token_hash, purpose, expires_at, used_at, created_at
        ",
    )
    .bind(user_id)
    .bind(token_hash)
    .bind(purpose)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(token)
}

/// Find an unused, unexpired token by hash and purpose.
pub async fn find_valid_account_token(
    pool: &PgPool,
    token_hash: &str,
    purpose: TokenPurpose,
) -> sqlx::Result<Option<AccountToken>> {
    sqlx::query_as::<_, AccountToken>(
        r"
        SELECT id, user_id, token_hash, purpose, expires_at, used_at, created_at
        FROM account_tokens
        WHERE token_hash = $1
          AND purpose = $2
          AND used_at IS NULL
          AND expires_at > NOW()
        ",
    )
    .bind(token_hash)
    .bind(purpose)
    .fetch_optional(pool)
    .await
}

/// Mark a token as used.
pub async fn mark_account_token_used(pool: &PgPool, token_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE account_tokens SET used_at = NOW() WHERE id = $1")
        .bind(token_id)
        .execute(pool)
        .await?;

    Ok(())
}
