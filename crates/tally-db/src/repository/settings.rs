//! # Settlement Settings Repository
//!
//! The singleton `settlement_settings` row and the `settlement_reason` list.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tally_core::validation::validate_code;
use tally_core::{SettlementReason, SettlementSettings};

#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Reads the settings row. The migration guarantees it exists.
    pub async fn get(&self, conn: &mut SqliteConnection) -> DbResult<SettlementSettings> {
        let settings = sqlx::query_as::<_, SettlementSettings>(
            r#"
            SELECT
                check_suspended_bills,
                check_partial_transactions,
                require_settlement_before_session_close,
                allow_deferred_settlement,
                require_session_ownership_to_close,
                block_billing_on_pending_settlement,
                block_session_start_on_pending_settlement
            FROM settlement_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("SettlementSettings", "1"))?;
        Ok(settings)
    }

    /// Replaces every flag in one statement.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        settings: &SettlementSettings,
        updated_by: &str,
    ) -> DbResult<()> {
        info!(?settings, updated_by = %updated_by, "Updating settlement settings");

        sqlx::query(
            r#"
            UPDATE settlement_settings SET
                check_suspended_bills = ?1,
                check_partial_transactions = ?2,
                require_settlement_before_session_close = ?3,
                allow_deferred_settlement = ?4,
                require_session_ownership_to_close = ?5,
                block_billing_on_pending_settlement = ?6,
                block_session_start_on_pending_settlement = ?7,
                updated_by = ?8,
                updated_at = ?9
            WHERE id = 1
            "#,
        )
        .bind(settings.check_suspended_bills)
        .bind(settings.check_partial_transactions)
        .bind(settings.require_settlement_before_session_close)
        .bind(settings.allow_deferred_settlement)
        .bind(settings.require_session_ownership_to_close)
        .bind(settings.block_billing_on_pending_settlement)
        .bind(settings.block_session_start_on_pending_settlement)
        .bind(updated_by)
        .bind(Utc::now())
        .execute(conn)
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reasons
    // -------------------------------------------------------------------------

    pub async fn list_active_reasons(&self) -> DbResult<Vec<SettlementReason>> {
        let reasons = sqlx::query_as::<_, SettlementReason>(
            r#"
            SELECT code, name, reason_type, is_active
            FROM settlement_reason
            WHERE is_active = 1
            ORDER BY code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(reasons)
    }

    /// Finds a reason by code whether active or not.
    pub async fn find_reason(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> DbResult<Option<SettlementReason>> {
        let reason = sqlx::query_as::<_, SettlementReason>(
            "SELECT code, name, reason_type, is_active FROM settlement_reason WHERE code = ?1",
        )
        .bind(code.trim())
        .fetch_optional(conn)
        .await?;
        Ok(reason)
    }

    /// Inserts a reason, keeping an existing row with the same code.
    pub async fn insert_reason(
        &self,
        conn: &mut SqliteConnection,
        reason: &SettlementReason,
    ) -> DbResult<()> {
        validate_code("code", &reason.code).map_err(|e| DbError::ConstraintViolation(e.to_string()))?;
        debug!(code = %reason.code, "Inserting settlement reason");

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO settlement_reason (code, name, reason_type, is_active)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&reason.code)
        .bind(&reason.name)
        .bind(reason.reason_type)
        .bind(reason.is_active)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn set_reason_active(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
        active: bool,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE settlement_reason SET is_active = ?1 WHERE code = ?2")
            .bind(active)
            .bind(code)
            .execute(conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("SettlementReason", code));
        }
        Ok(())
    }
}
