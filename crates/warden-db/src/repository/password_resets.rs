//! Password reset token operations

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{NewPasswordResetToken, PasswordResetToken, ResetCompletion};
use crate::repository::Database;
use crate::store::PasswordResetStore;
use crate::utils::format_datetime;

impl Database {
    /// Insert a new password reset token
    pub async fn insert_password_reset(
        &self,
        token: NewPasswordResetToken,
    ) -> Result<PasswordResetToken, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&token.user_id)
        .bind(&token.token_hash)
        .bind(format_datetime(token.expires_at))
        .bind(format_datetime(now))
        .execute(&self.pool)
        .await?;

        Ok(PasswordResetToken {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used_at: None,
            created_at: now,
        })
    }

    /// Get a password reset token by hash
    pub async fn get_password_reset_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PasswordResetToken>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, user_id, token_hash, expires_at, used_at, created_at
            FROM password_reset_tokens
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        result
            .map(|row| PasswordResetToken::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Apply a completed password reset in one transaction
    pub async fn complete_password_reset(
        &self,
        completion: ResetCompletion,
    ) -> Result<bool, DbError> {
        let at = format_datetime(completion.completed_at);
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE password_reset_tokens
            SET used_at = ?
            WHERE id = ? AND used_at IS NULL AND expires_at > ?
            "#,
        )
        .bind(&at)
        .bind(&completion.reset_id)
        .bind(&at)
        .execute(&mut *tx)
        .await?;

        if marked.rows_affected() == 0 {
            debug!("Password reset {} already consumed or expired", completion.reset_id);
            tx.rollback().await?;
            return Ok(false);
        }

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?, must_reset_password = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&completion.password_hash)
        .bind(&at)
        .bind(&completion.user_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::NotFound(format!("User '{}'", completion.user_id)));
        }

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = 1, revoked_at = ?
            WHERE user_id = ? AND revoked = 0
            "#,
        )
        .bind(&at)
        .bind(&completion.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Password reset applied for user {} ({} sessions revoked)",
            completion.user_id,
            revoked.rows_affected()
        );
        Ok(true)
    }
}

#[async_trait]
impl PasswordResetStore for Database {
    async fn create(&self, token: NewPasswordResetToken) -> Result<PasswordResetToken, DbError> {
        self.insert_password_reset(token).await
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PasswordResetToken>, DbError> {
        self.get_password_reset_by_hash(token_hash).await
    }

    async fn consume(&self, completion: ResetCompletion) -> Result<bool, DbError> {
        self.complete_password_reset(completion).await
    }
}
