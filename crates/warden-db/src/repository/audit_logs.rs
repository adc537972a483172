//! Audit log operations

use chrono::Utc;
use sqlx::Row;
use tracing::warn;

use crate::error::DbError;
use crate::models::{AuditEvent, AuditLog};
use crate::repository::Database;
use crate::store::AuditSink;
use crate::utils::format_datetime;

impl Database {
    /// Insert a new audit log entry
    pub async fn insert_audit_log(&self, event: AuditEvent) -> Result<AuditLog, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (action, entity_type, entity_id, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(event.action.as_str())
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(format_datetime(now))
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = result.get("id");

        Ok(AuditLog {
            id,
            action: event.action,
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            created_at: now,
        })
    }

    /// List the most recent audit log entries, newest first
    pub async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLog>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, entity_type, entity_id, created_at
            FROM audit_logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| AuditLog::try_from(row).map_err(DbError::from))
            .collect()
    }
}

impl AuditSink for Database {
    fn record(&self, event: AuditEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, dropping audit event {}", event.action.as_str());
            return;
        };

        let db = self.clone();
        handle.spawn(async move {
            let action = event.action.as_str();
            if let Err(e) = db.insert_audit_log(event).await {
                warn!("Failed to record audit event {}: {}", action, e);
            }
        });
    }
}
