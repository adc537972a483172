//! Role and permission operations

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::DbError;
use crate::models::Role;
use crate::repository::Database;
use crate::store::RoleStore;
use crate::utils::format_datetime;

/// Fold `(role_id, role_name, permission?)` rows into roles
fn collect_roles(rows: &[SqliteRow]) -> Result<Vec<Role>, DbError> {
    let mut roles: BTreeMap<String, Role> = BTreeMap::new();

    for row in rows {
        let id: String = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let permission: Option<String> = row.try_get("permission")?;

        let role = roles.entry(name.clone()).or_insert_with(|| Role {
            id,
            name,
            permissions: BTreeSet::new(),
        });
        if let Some(permission) = permission {
            role.permissions.insert(permission);
        }
    }

    Ok(roles.into_values().collect())
}

impl Database {
    /// Insert a new role
    pub async fn insert_role(&self, name: &str) -> Result<Role, DbError> {
        if self.get_role_by_name(name).await?.is_some() {
            return Err(DbError::Duplicate(format!("Role '{}' already exists", name)));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO roles (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(format_datetime(Utc::now()))
            .execute(&self.pool)
            .await?;

        Ok(Role {
            id,
            name: name.to_string(),
            permissions: BTreeSet::new(),
        })
    }

    /// Get a role (with permissions) by name
    pub async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, rp.permission
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE r.name = ?
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(collect_roles(&rows)?.into_iter().next())
    }

    /// Grant a permission to a role (idempotent)
    pub async fn grant_permission(&self, role_id: &str, permission: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO role_permissions (role_id, permission) VALUES (?, ?)")
            .bind(role_id)
            .bind(permission)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Assign a role to a user (idempotent)
    pub async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List every role with its permissions
    pub async fn list_roles_with_permissions(&self) -> Result<Vec<Role>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, rp.permission
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            ORDER BY r.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        collect_roles(&rows)
    }

    /// Get the roles assigned to a user
    pub async fn get_roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, rp.permission
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        collect_roles(&rows)
    }
}

#[async_trait]
impl RoleStore for Database {
    async fn find_all_with_permissions(&self) -> Result<Vec<Role>, DbError> {
        self.list_roles_with_permissions().await
    }

    async fn roles_for_user(&self, user_id: &str) -> Result<Vec<Role>, DbError> {
        self.get_roles_for_user(user_id).await
    }
}
