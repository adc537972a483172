//! One-time password reset tokens

use std::sync::Arc;

use tracing::{debug, info};
use warden_db::{
    AuditAction, AuditEvent, AuditSink, DbError, NewPasswordResetToken, PasswordResetStore,
    ResetCompletion, UserStore,
};

use crate::clock::{Clock, expires_after};
use crate::config::AuthConfig;
use crate::error::{AuthError, with_timeout};
use crate::password::hash_password;
use crate::token::{generate_token, hash_token};

/// Outcome of a reset request.
///
/// `token` always has the same shape; when `issued` is false it is a decoy
/// that was never stored, so callers must not deliver it.
#[derive(Debug, Clone)]
pub struct ResetRequested {
    pub token: String,
    pub issued: bool,
}

pub struct PasswordResetManager {
    users: Arc<dyn UserStore>,
    resets: Arc<dyn PasswordResetStore>,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl PasswordResetManager {
    pub fn new(
        users: Arc<dyn UserStore>,
        resets: Arc<dyn PasswordResetStore>,
        config: AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            resets,
            config,
            clock,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Issue a reset token for `email`.
    ///
    /// Unknown and inactive accounts get a decoy instead of an error.
    pub async fn request_reset(&self, email: &str) -> Result<ResetRequested, AuthError> {
        let token = generate_token()?;

        let user = with_timeout(self.config.store_timeout, self.users.find_by_email(email)).await?;
        let Some(user) = user.filter(|u| u.is_active) else {
            debug!("Password reset requested for unknown or inactive account");
            return Ok(ResetRequested {
                token,
                issued: false,
            });
        };

        let expires_at = expires_after(self.clock.now(), self.config.reset_token_ttl)?;
        with_timeout(
            self.config.store_timeout,
            self.resets.create(NewPasswordResetToken {
                user_id: user.id.clone(),
                token_hash: hash_token(&token),
                expires_at,
            }),
        )
        .await?;

        self.audit(AuditAction::PasswordResetRequest, &user.id);
        info!("Password reset issued for user {}", user.id);

        Ok(ResetRequested {
            token,
            issued: true,
        })
    }

    /// Set a new password with a reset token.
    ///
    /// The token is consumed, the password replaced and every refresh token of
    /// the user revoked in one store operation; on failure none of it happens.
    pub async fn complete_reset(&self, raw: &str, new_password: &str) -> Result<(), AuthError> {
        let now = self.clock.now();

        let reset = with_timeout(
            self.config.store_timeout,
            self.resets.find_by_hash(&hash_token(raw)),
        )
        .await?
        .filter(|r| r.is_usable_at(now))
        .ok_or(AuthError::InvalidOrExpiredToken)?;

        let user = with_timeout(self.config.store_timeout, self.users.find_by_id(&reset.user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.validate_password(new_password)?;
        let password_hash = hash_password(new_password)?;

        let consumed = with_timeout(
            self.config.store_timeout,
            self.resets.consume(ResetCompletion {
                reset_id: reset.id.clone(),
                user_id: user.id.clone(),
                password_hash,
                // Re-read after hashing so a token that expired meanwhile is refused
                completed_at: self.clock.now(),
            }),
        )
        .await
        .map_err(|e| match e {
            AuthError::Persistence(DbError::NotFound(_)) => AuthError::UserNotFound,
            other => other,
        })?;

        if !consumed {
            debug!("Password reset {} was consumed concurrently or expired", reset.id);
            return Err(AuthError::InvalidOrExpiredToken);
        }

        self.audit(AuditAction::PasswordResetComplete, &user.id);
        info!("Password reset completed for user {}", user.id);
        Ok(())
    }

    fn validate_password(&self, password: &str) -> Result<(), AuthError> {
        let length = password.chars().count();
        if length < self.config.min_password_length {
            return Err(AuthError::InvalidPassword(format!(
                "must be at least {} characters",
                self.config.min_password_length
            )));
        }
        Ok(())
    }

    fn audit(&self, action: AuditAction, user_id: &str) {
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::user(action, user_id));
        }
    }
}
