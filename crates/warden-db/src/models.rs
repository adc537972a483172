//! Database models

use crate::utils::{parse_datetime_or_now, parse_optional_datetime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Role name that bypasses every permission check
pub const SUPER_ADMIN: &str = "SUPER_ADMIN";

/// Entity type recorded for audit events about users
pub const USERS_ENTITY: &str = "users";

/// Error type for parsing models from strings
#[derive(Debug, Clone)]
pub enum ParseError {
    InvalidAuditAction(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidAuditAction(s) => write!(f, "Invalid audit action: {}", s),
        }
    }
}

impl std::error::Error for ParseError {}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub must_reset_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New user (for insertion)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub must_reset_password: bool,
}

/// Persisted refresh token. Only the SHA-256 of the raw token is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Hash of the successor when this token was rotated out
    pub replaced_by_hash: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Not revoked and not yet expired at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }

    /// Revoked by rotation rather than by logout
    pub fn was_rotated(&self) -> bool {
        self.revoked && self.replaced_by_hash.is_some()
    }
}

/// New refresh token (for insertion)
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One-time password reset token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordResetToken {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

/// New password reset token (for insertion)
#[derive(Debug, Clone)]
pub struct NewPasswordResetToken {
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything a completed reset writes. Applied as a single unit by
/// [`PasswordResetStore::consume`](crate::store::PasswordResetStore::consume).
#[derive(Debug, Clone)]
pub struct ResetCompletion {
    pub reset_id: String,
    pub user_id: String,
    pub password_hash: String,
    pub completed_at: DateTime<Utc>,
}

/// Role with its permission names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub permissions: BTreeSet<String>,
}

impl Role {
    pub fn is_super_admin(&self) -> bool {
        self.name == SUPER_ADMIN
    }
}

/// Audited action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    TokenRefresh,
    RefreshTokenReuse,
    Logout,
    LogoutAll,
    PasswordResetRequest,
    PasswordResetComplete,
    AdminSeeded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Login => "LOGIN",
            AuditAction::TokenRefresh => "TOKEN_REFRESH",
            AuditAction::RefreshTokenReuse => "REFRESH_TOKEN_REUSE",
            AuditAction::Logout => "LOGOUT",
            AuditAction::LogoutAll => "LOGOUT_ALL",
            AuditAction::PasswordResetRequest => "PASSWORD_RESET_REQUEST",
            AuditAction::PasswordResetComplete => "PASSWORD_RESET_COMPLETE",
            AuditAction::AdminSeeded => "ADMIN_SEEDED",
        }
    }
}

impl FromStr for AuditAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN" => Ok(AuditAction::Login),
            "TOKEN_REFRESH" => Ok(AuditAction::TokenRefresh),
            "REFRESH_TOKEN_REUSE" => Ok(AuditAction::RefreshTokenReuse),
            "LOGOUT" => Ok(AuditAction::Logout),
            "LOGOUT_ALL" => Ok(AuditAction::LogoutAll),
            "PASSWORD_RESET_REQUEST" => Ok(AuditAction::PasswordResetRequest),
            "PASSWORD_RESET_COMPLETE" => Ok(AuditAction::PasswordResetComplete),
            "ADMIN_SEEDED" => Ok(AuditAction::AdminSeeded),
            _ => Err(ParseError::InvalidAuditAction(s.to_string())),
        }
    }
}

/// Audit event handed to an [`AuditSink`](crate::store::AuditSink)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
}

impl AuditEvent {
    /// Event about a user account
    pub fn user(action: AuditAction, user_id: &str) -> Self {
        Self {
            action,
            entity_type: USERS_ENTITY.to_string(),
            entity_id: user_id.to_string(),
        }
    }
}

/// Audit log entry as stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            must_reset_password: row.try_get("must_reset_password")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for RefreshToken {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(RefreshToken {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            token_hash: row.try_get("token_hash")?,
            expires_at: parse_datetime_or_now(&row.try_get::<String, _>("expires_at")?),
            revoked: row.try_get("revoked")?,
            revoked_at: parse_optional_datetime(row.try_get("revoked_at")?),
            replaced_by_hash: row.try_get("replaced_by_hash")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for PasswordResetToken {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(PasswordResetToken {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            token_hash: row.try_get("token_hash")?,
            expires_at: parse_datetime_or_now(&row.try_get::<String, _>("expires_at")?),
            used_at: parse_optional_datetime(row.try_get("used_at")?),
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for AuditLog {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let action: String = row.try_get("action")?;
        Ok(AuditLog {
            id: row.try_get("id")?,
            action: AuditAction::from_str(&action).map_err(|e| sqlx::Error::ColumnDecode {
                index: "action".to_string(),
                source: Box::new(e),
            })?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_in: Duration, revoked: bool, replaced: Option<&str>) -> RefreshToken {
        let now = Utc::now();
        RefreshToken {
            id: "rt-1".to_string(),
            user_id: "u1".to_string(),
            token_hash: "hash".to_string(),
            expires_at: now + expires_in,
            revoked,
            revoked_at: revoked.then_some(now),
            replaced_by_hash: replaced.map(str::to_string),
            ip_address: None,
            user_agent: None,
            created_at: now,
        }
    }

    #[test]
    fn test_refresh_token_states() {
        let now = Utc::now();

        assert!(token(Duration::days(1), false, None).is_active_at(now));
        assert!(!token(Duration::days(-1), false, None).is_active_at(now));

        let logged_out = token(Duration::days(1), true, None);
        assert!(!logged_out.is_active_at(now));
        assert!(!logged_out.was_rotated());

        let rotated = token(Duration::days(1), true, Some("next"));
        assert!(rotated.was_rotated());
    }

    #[test]
    fn test_reset_token_is_single_use() {
        let now = Utc::now();
        let mut reset = PasswordResetToken {
            id: "pr-1".to_string(),
            user_id: "u1".to_string(),
            token_hash: "hash".to_string(),
            expires_at: now + Duration::minutes(15),
            used_at: None,
            created_at: now,
        };
        assert!(reset.is_usable_at(now));
        assert!(!reset.is_usable_at(now + Duration::minutes(15)));

        reset.used_at = Some(now);
        assert!(!reset.is_usable_at(now));
    }

    #[test]
    fn test_audit_action_parsing() {
        for action in [
            AuditAction::Login,
            AuditAction::RefreshTokenReuse,
            AuditAction::PasswordResetComplete,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()).unwrap(), action);
        }
        assert!(AuditAction::from_str("login").is_err());
    }
}
