//! User operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{NewUser, User};
use crate::repository::Database;
use crate::store::UserStore;
use crate::utils::format_datetime;

impl Database {
    // ==================== User Operations ====================

    /// Insert a new user
    pub async fn insert_user(&self, user: NewUser) -> Result<User, DbError> {
        let now = Utc::now();

        // Check if user already exists
        let existing = self.get_user_by_email(&user.email).await?;
        if existing.is_some() {
            return Err(DbError::Duplicate(format!("User '{}' already exists", user.email)));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, is_active, must_reset_password, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.must_reset_password)
        .bind(format_datetime(now))
        .bind(format_datetime(now))
        .execute(&self.pool)
        .await?;

        Ok(User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            is_active: user.is_active,
            must_reset_password: user.must_reset_password,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a user by email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, email, password_hash, is_active, must_reset_password, created_at, updated_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| User::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Get a user by ID
    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, email, password_hash, is_active, must_reset_password, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| User::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Update the mutable credential fields of a user
    pub async fn update_user(&self, user: &User) -> Result<bool, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = ?, is_active = ?, must_reset_password = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.must_reset_password)
        .bind(format_datetime(now))
        .bind(&user.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Check if any users exist
    pub async fn has_users(&self) -> Result<bool, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM users")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = result.get("count");
        Ok(count > 0)
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        self.get_user_by_email(email).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, DbError> {
        self.get_user_by_id(id).await
    }

    async fn update(&self, user: &User) -> Result<(), DbError> {
        if self.update_user(user).await? {
            Ok(())
        } else {
            Err(DbError::NotFound(format!("User '{}'", user.id)))
        }
    }
}
