//! Database Models
//!
//! Account and session rows. RBAC models live in `crate::rbac::models`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User account model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Stored lowercased; uniqueness is case-insensitive.
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub email_confirmed: bool,
    /// TOTP secret, AES-256-GCM encrypted at rest. Presence = 2FA enabled.
    pub totp_secret: Option<String>,
    pub failed_login_count: i32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the account is currently locked out.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }

    /// Whether 2FA is enabled for this account.
    #[must_use]
    pub const fn totp_enabled(&self) -> bool {
        self.totp_secret.is_some()
    }
}

/// Account lifecycle status. Exactly one holds at any time.
///
/// Accounts are never physically deleted; `Deleted` is a soft delete that
/// retains the row (and its role history) for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Registered but email not yet confirmed.
    Registered,
    /// Fully active account.
    Active,
    /// Blocked by an administrator.
    Blocked,
    /// Temporarily suspended.
    Suspended,
    /// Soft-deleted.
    Deleted,
}

/// Session model for refresh token tracking.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    /// Session ID.
    pub id: Uuid,
    /// User this session belongs to.
    pub user_id: Uuid,
    /// SHA256 hash of the refresh token.
    pub token_hash: String,
    /// When the session/token expires.
    pub expires_at: DateTime<Utc>,
    /// IP address of the client (stored as string for simplicity).
    pub ip_address: Option<String>,
    /// User agent of the client.
    pub user_agent: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// One-time account token (email confirmation or password reset).
#[derive(Debug, Clone, FromRow)]
pub struct AccountToken {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA256 hash of the token value; the plaintext only ever leaves via email.
    pub token_hash: String,
    pub purpose: TokenPurpose,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What an [`AccountToken`] is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "token_purpose", rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailConfirmation,
    PasswordReset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_with_lockout(lockout_until: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::now_v7(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "x".into(),
            status: UserStatus::Active,
            email_confirmed: true,
            totp_secret: None,
            failed_login_count: 0,
            lockout_until,
            phone_number: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_locked_future() {
        let now = Utc::now();
        let user = user_with_lockout(Some(now + Duration::minutes(5)));
        assert!(user.is_locked(now));
    }

    #[test]
    fn test_is_locked_expired() {
        let now = Utc::now();
        let user = user_with_lockout(Some(now - Duration::minutes(5)));
        assert!(!user.is_locked(now));
    }

    #[test]
    fn test_is_locked_unset() {
        let user = user_with_lockout(None);
        assert!(!user.is_locked(Utc::now()));
    }
}
