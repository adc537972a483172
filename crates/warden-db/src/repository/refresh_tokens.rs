//! Refresh token operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{NewRefreshToken, RefreshToken};
use crate::repository::Database;
use crate::store::RefreshTokenStore;
use crate::utils::format_datetime;

const REFRESH_TOKEN_COLUMNS: &str = "id, user_id, token_hash, expires_at, revoked, revoked_at, \
     replaced_by_hash, ip_address, user_agent, created_at";

impl Database {
    /// Insert a new refresh token
    pub async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> Result<RefreshToken, DbError> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, revoked, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&token.user_id)
        .bind(&token.token_hash)
        .bind(format_datetime(token.expires_at))
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .bind(format_datetime(now))
        .execute(&self.pool)
        .await?;

        Ok(RefreshToken {
            id,
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by_hash: None,
            ip_address: token.ip_address,
            user_agent: token.user_agent,
            created_at: now,
        })
    }

    /// Get an unrevoked, unexpired refresh token by hash
    pub async fn get_active_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, DbError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = ? AND revoked = 0 AND expires_at > ?",
            REFRESH_TOKEN_COLUMNS
        );
        let result = sqlx::query(&query)
            .bind(token_hash)
            .bind(format_datetime(now))
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| RefreshToken::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// Get a refresh token by hash regardless of state
    pub async fn get_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, DbError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = ?",
            REFRESH_TOKEN_COLUMNS
        );
        let result = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        result
            .map(|row| RefreshToken::try_from(&row).map_err(DbError::from))
            .transpose()
    }

    /// List all refresh tokens of a user, newest first
    pub async fn list_refresh_tokens_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<RefreshToken>, DbError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = ? ORDER BY created_at DESC",
            REFRESH_TOKEN_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| RefreshToken::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Revoke a refresh token if it is not revoked yet
    pub async fn revoke_refresh_token(
        &self,
        id: &str,
        replaced_by_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = 1, revoked_at = ?, replaced_by_hash = ?
            WHERE id = ? AND revoked = 0
            "#,
        )
        .bind(format_datetime(at))
        .bind(replaced_by_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke all unrevoked refresh tokens of a user
    pub async fn revoke_user_refresh_tokens(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = 1, revoked_at = ?
            WHERE user_id = ? AND revoked = 0
            "#,
        )
        .bind(format_datetime(at))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenStore for Database {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken, DbError> {
        self.insert_refresh_token(token).await
    }

    async fn find_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, DbError> {
        self.get_active_refresh_token(token_hash, now).await
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, DbError> {
        self.get_refresh_token_by_hash(token_hash).await
    }

    async fn revoke(
        &self,
        id: &str,
        replaced_by_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        self.revoke_refresh_token(id, replaced_by_hash, at).await
    }

    async fn revoke_all_for_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<u64, DbError> {
        self.revoke_user_refresh_tokens(user_id, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::temp_database;
    use chrono::Duration;

    fn new_token(user_id: &str, hash: &str, expires_at: DateTime<Utc>) -> NewRefreshToken {
        NewRefreshToken {
            user_id: user_id.to_string(),
            token_hash: hash.to_string(),
            expires_at,
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[tokio::test]
    async fn test_active_lookup_respects_expiry() {
        let (db, _dir) = temp_database().await;
        let now = Utc::now();

        db.insert_refresh_token(new_token("u1", "live", now + Duration::days(30)))
            .await
            .unwrap();
        db.insert_refresh_token(new_token("u1", "stale", now - Duration::seconds(1)))
            .await
            .unwrap();

        let live = db.get_active_refresh_token("live", now).await.unwrap().unwrap();
        assert_eq!(live.user_id, "u1");
        assert_eq!(live.user_agent.as_deref(), Some("test-agent"));

        assert!(db.get_active_refresh_token("stale", now).await.unwrap().is_none());
        // Still visible to the state-agnostic lookup
        assert!(db.get_refresh_token_by_hash("stale").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_conditional() {
        let (db, _dir) = temp_database().await;
        let now = Utc::now();
        let token = db
            .insert_refresh_token(new_token("u1", "old", now + Duration::days(30)))
            .await
            .unwrap();

        assert!(db.revoke_refresh_token(&token.id, Some("new"), now).await.unwrap());
        assert!(!db.revoke_refresh_token(&token.id, None, now).await.unwrap());

        let stored = db.get_refresh_token_by_hash("old").await.unwrap().unwrap();
        assert!(stored.revoked);
        assert!(stored.was_rotated());
        assert_eq!(stored.replaced_by_hash.as_deref(), Some("new"));
        assert!(db.get_active_refresh_token("old", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let (db, _dir) = temp_database().await;
        let now = Utc::now();
        let expires = now + Duration::days(30);

        db.insert_refresh_token(new_token("u1", "a", expires)).await.unwrap();
        db.insert_refresh_token(new_token("u1", "b", expires)).await.unwrap();
        db.insert_refresh_token(new_token("u2", "c", expires)).await.unwrap();

        assert_eq!(db.revoke_user_refresh_tokens("u1", now).await.unwrap(), 2);
        assert_eq!(db.revoke_user_refresh_tokens("u1", now).await.unwrap(), 0);

        let remaining = db.list_refresh_tokens_for_user("u2").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining[0].revoked);
    }
}
