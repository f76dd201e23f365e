//! # Audit Repository
//!
//! Append-only trail of every state transition, written in the same
//! transaction as the change it describes.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use tally_core::AuditEntry;

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    entity_type: String,
    entity_id: String,
    action: String,
    actor_id: Option<String>,
    approver_id: Option<String>,
    details: String,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    pub async fn record(&self, conn: &mut SqliteConnection, entry: &AuditEntry) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, entity_type, entity_id, action, actor_id, approver_id, details, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.action)
        .bind(&entry.actor_id)
        .bind(&entry.approver_id)
        .bind(entry.details.to_string())
        .bind(entry.recorded_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Trail of one entity, oldest first.
    pub async fn list_for_entity(&self, entity_type: &str, entity_id: &str) -> DbResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, entity_type, entity_id, action, actor_id, approver_id, details, recorded_at
            FROM audit_log
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY recorded_at, rowid
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> DbResult<AuditEntry> {
                Ok(AuditEntry {
                    id: row.id,
                    entity_type: row.entity_type,
                    entity_id: row.entity_id,
                    action: row.action,
                    actor_id: row.actor_id,
                    approver_id: row.approver_id,
                    details: serde_json::from_str(&row.details)?,
                    recorded_at: row.recorded_at,
                })
            })
            .collect()
    }
}
