//! # Day Repository
//!
//! `day_open` rows and the per-day counters.
//!
//! ```text
//! take_session_number / take_sale_number
//!   UPDATE ... SET next_x = next_x + 1 WHERE id = ? AND is_active = 1
//!   RETURNING next_x - 1
//! ```
//! The counter is read and advanced in one statement, so two transactions
//! can never be handed the same number.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::DayOpen;

const DAY_COLUMNS: &str = r#"
    id, location_id, business_date, opened_by, opened_at, closed_by, closed_at,
    is_active, next_sale_number, next_session_number
"#;

/// Every call runs on the caller's connection.
#[derive(Debug, Clone, Default)]
pub struct DayRepository;

impl DayRepository {
    pub fn new() -> Self {
        DayRepository
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, day: &DayOpen) -> DbResult<()> {
        debug!(id = %day.id, location_id = %day.location_id, date = %day.business_date, "Inserting day");

        sqlx::query(
            r#"
            INSERT INTO day_open (
                id, location_id, business_date, opened_by, opened_at, closed_by, closed_at,
                is_active, next_sale_number, next_session_number
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&day.id)
        .bind(&day.location_id)
        .bind(day.business_date)
        .bind(&day.opened_by)
        .bind(day.opened_at)
        .bind(&day.closed_by)
        .bind(day.closed_at)
        .bind(day.is_active)
        .bind(day.next_sale_number)
        .bind(day.next_session_number)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<DayOpen>> {
        let day = sqlx::query_as::<_, DayOpen>(&format!(
            "SELECT {} FROM day_open WHERE id = ?1",
            DAY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(day)
    }

    pub async fn find_active(
        &self,
        conn: &mut SqliteConnection,
        location_id: &str,
    ) -> DbResult<Option<DayOpen>> {
        let day = sqlx::query_as::<_, DayOpen>(&format!(
            "SELECT {} FROM day_open WHERE location_id = ?1 AND is_active = 1",
            DAY_COLUMNS
        ))
        .bind(location_id)
        .fetch_optional(conn)
        .await?;
        Ok(day)
    }

    /// Deactivates the day, freezing its counters.
    pub async fn close(
        &self,
        conn: &mut SqliteConnection,
        day_id: &str,
        closed_by: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE day_open
            SET is_active = 0, closed_by = ?2, closed_at = ?3
            WHERE id = ?1 AND is_active = 1
            "#,
        )
        .bind(day_id)
        .bind(closed_by)
        .bind(at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!("day {} is no longer active", day_id)));
        }
        debug!(day_id = %day_id, "Day closed");
        Ok(())
    }

    /// Hands out the next session number of an active day.
    pub async fn take_session_number(&self, conn: &mut SqliteConnection, day_id: &str) -> DbResult<i64> {
        let number: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE day_open
            SET next_session_number = next_session_number + 1
            WHERE id = ?1 AND is_active = 1
            RETURNING next_session_number - 1
            "#,
        )
        .bind(day_id)
        .fetch_optional(conn)
        .await?;

        number.ok_or_else(|| DbError::conflict(format!("day {} is no longer active", day_id)))
    }

    /// Hands out the next sale number of an active day.
    pub async fn take_sale_number(&self, conn: &mut SqliteConnection, day_id: &str) -> DbResult<i64> {
        let number: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE day_open
            SET next_sale_number = next_sale_number + 1
            WHERE id = ?1 AND is_active = 1
            RETURNING next_sale_number - 1
            "#,
        )
        .bind(day_id)
        .fetch_optional(conn)
        .await?;

        number.ok_or_else(|| DbError::conflict(format!("day {} is no longer active", day_id)))
    }
}
