//! Store traits consumed by the authentication core
//!
//! Lookups return `Ok(None)` for a missing record; `Err` is reserved for
//! backend failures. Callers pass `now` wherever validity depends on time so
//! that implementations never consult a wall clock for expiry decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{
    AuditEvent, NewPasswordResetToken, NewRefreshToken, PasswordResetToken, RefreshToken,
    ResetCompletion, Role, User,
};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DbError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DbError>;

    /// Persist `password_hash`, `is_active` and `must_reset_password`.
    /// Fails with [`DbError::NotFound`] if the user does not exist.
    async fn update(&self, user: &User) -> Result<(), DbError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, DbError>;

    /// Token with this hash that is neither revoked nor expired at `now`
    async fn find_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, DbError>;

    /// Token with this hash in any state
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, DbError>;

    /// Revoke a token that is still unrevoked.
    ///
    /// Returns `false` when the token was already revoked; rotation relies on
    /// this being a single conditional write.
    async fn revoke(
        &self,
        id: &str,
        replaced_by_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError>;

    /// Revoke every unrevoked token of a user, returning how many changed
    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64, DbError>;
}

#[async_trait]
pub trait PasswordResetStore: Send + Sync {
    async fn create(&self, token: NewPasswordResetToken) -> Result<PasswordResetToken, DbError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError>;

    /// Mark the reset token used, store the new password hash (clearing
    /// `must_reset_password`) and revoke all of the user's refresh tokens,
    /// all or nothing.
    ///
    /// Returns `false` without writing anything if the token was already used.
    async fn consume(&self, completion: ResetCompletion) -> Result<bool, DbError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_all_with_permissions(&self) -> Result<Vec<Role>, DbError>;

    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DbError>;
}

/// Fire-and-forget audit trail
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}
