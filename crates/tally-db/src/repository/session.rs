//! # Session Repository
//!
//! Sessions, their cash book, interim snapshots, drop acknowledgements and the
//! per-session sales projection.
//!
//! ## Conditional Updates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every state change is written as                                       │
//! │                                                                         │
//! │     UPDATE pos_session SET state = <to>, ...                           │
//! │     WHERE id = ? AND state = <from>                                    │
//! │                                                                         │
//! │  0 rows affected ⇒ DbError::Conflict. The caller already holds the     │
//! │  session lock, so this only fires when another process raced us.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cash entries and snapshots are insert-only; the schema rejects UPDATE and
//! DELETE on both tables.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use tally_core::cash_book::{CashBook, CashEntry};
use tally_core::{
    ClosingSnapshot, InterimSettlementSnapshot, SalesAggregate, Session, SessionSale, SessionState,
};

const SESSION_COLUMNS: &str = r#"
    id, session_number, terminal_id, location_id, cashier_id, day_open_id, state,
    opening_cash_minor, base_expected_cash_minor, total_counted_cash_minor,
    closing_cash_minor, variance_minor, variance_reason, closing_snapshot,
    opened_at, closed_at
"#;

const SNAPSHOT_COLUMNS: &str = r#"
    id, session_id, sequence, counted_cash_minor, expected_cash_minor, variance_minor,
    drop_amount_minor, note, recorded_by, approver_id, recorded_at
"#;

const SALE_COLUMNS: &str = r#"
    id, session_id, sale_number, status, cash_minor, non_cash_minor, refund_minor,
    reference, recorded_at
"#;

/// `pos_session` as stored; snapshots live in their own table.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    session_number: i64,
    terminal_id: String,
    location_id: String,
    cashier_id: String,
    day_open_id: String,
    state: SessionState,
    opening_cash_minor: i64,
    base_expected_cash_minor: i64,
    total_counted_cash_minor: Option<i64>,
    closing_cash_minor: Option<i64>,
    variance_minor: Option<i64>,
    variance_reason: Option<String>,
    closing_snapshot: Option<String>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self, interim_settlements: Vec<InterimSettlementSnapshot>) -> DbResult<Session> {
        let closing_snapshot = self
            .closing_snapshot
            .as_deref()
            .map(serde_json::from_str::<ClosingSnapshot>)
            .transpose()?;

        Ok(Session {
            id: self.id,
            session_number: self.session_number,
            terminal_id: self.terminal_id,
            location_id: self.location_id,
            cashier_id: self.cashier_id,
            day_open_id: self.day_open_id,
            state: self.state,
            opening_cash_minor: self.opening_cash_minor,
            base_expected_cash_minor: self.base_expected_cash_minor,
            interim_settlements,
            total_counted_cash_minor: self.total_counted_cash_minor,
            closing_cash_minor: self.closing_cash_minor,
            variance_minor: self.variance_minor,
            variance_reason: self.variance_reason,
            closing_snapshot,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

/// Figures written when a session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRecord<'a> {
    pub counted_minor: i64,
    pub expected_minor: i64,
    pub variance_minor: i64,
    pub reason: Option<&'a str>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn insert(&self, conn: &mut SqliteConnection, session: &Session) -> DbResult<()> {
        debug!(
            id = %session.id,
            terminal_id = %session.terminal_id,
            session_number = session.session_number,
            "Inserting session"
        );

        let closing_snapshot = session
            .closing_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO pos_session (
                id, session_number, terminal_id, location_id, cashier_id, day_open_id, state,
                opening_cash_minor, base_expected_cash_minor, total_counted_cash_minor,
                closing_cash_minor, variance_minor, variance_reason, closing_snapshot,
                opened_at, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&session.id)
        .bind(session.session_number)
        .bind(&session.terminal_id)
        .bind(&session.location_id)
        .bind(&session.cashier_id)
        .bind(&session.day_open_id)
        .bind(session.state)
        .bind(session.opening_cash_minor)
        .bind(session.base_expected_cash_minor)
        .bind(session.total_counted_cash_minor)
        .bind(session.closing_cash_minor)
        .bind(session.variance_minor)
        .bind(&session.variance_reason)
        .bind(closing_snapshot)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn hydrate(&self, conn: &mut SqliteConnection, rows: Vec<SessionRow>) -> DbResult<Vec<Session>> {
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let snapshots = self.list_snapshots(&mut *conn, &row.id).await?;
            sessions.push(row.into_session(snapshots)?);
        }
        Ok(sessions)
    }

    async fn fetch_one_where(
        &self,
        conn: &mut SqliteConnection,
        filter: &str,
        value: &str,
    ) -> DbResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM pos_session WHERE {}",
            SESSION_COLUMNS, filter
        ))
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let snapshots = self.list_snapshots(&mut *conn, &row.id).await?;
                Ok(Some(row.into_session(snapshots)?))
            }
            None => Ok(None),
        }
    }

    /// Loads a session together with its interim snapshots.
    pub async fn find(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Session>> {
        self.fetch_one_where(conn, "id = ?1", id).await
    }

    /// The session currently occupying a terminal, if any.
    pub async fn find_active_for_terminal(
        &self,
        conn: &mut SqliteConnection,
        terminal_id: &str,
    ) -> DbResult<Option<Session>> {
        self.fetch_one_where(conn, "terminal_id = ?1 AND state <> 'closed'", terminal_id)
            .await
    }

    /// Every non-closed session of a cashier, newest first.
    pub async fn find_active_for_cashier(
        &self,
        conn: &mut SqliteConnection,
        cashier_id: &str,
    ) -> DbResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM pos_session WHERE cashier_id = ?1 AND state <> 'closed' ORDER BY opened_at DESC",
            SESSION_COLUMNS
        ))
        .bind(cashier_id)
        .fetch_all(&mut *conn)
        .await?;
        self.hydrate(conn, rows).await
    }

    pub async fn list_for_day(&self, conn: &mut SqliteConnection, day_id: &str) -> DbResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM pos_session WHERE day_open_id = ?1 ORDER BY session_number",
            SESSION_COLUMNS
        ))
        .bind(day_id)
        .fetch_all(&mut *conn)
        .await?;
        self.hydrate(conn, rows).await
    }

    /// Sessions at a location that are not settled: still active, or closed
    /// with a variance beyond `tolerance_minor` and no reason.
    pub async fn list_unsettled_for_location(
        &self,
        conn: &mut SqliteConnection,
        location_id: &str,
        tolerance_minor: i64,
    ) -> DbResult<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {} FROM pos_session
            WHERE location_id = ?1
              AND (state <> 'closed'
                   OR (variance_reason IS NULL AND ABS(COALESCE(variance_minor, 0)) > ?2))
            ORDER BY opened_at
            "#,
            SESSION_COLUMNS
        ))
        .bind(location_id)
        .bind(tolerance_minor)
        .fetch_all(&mut *conn)
        .await?;
        self.hydrate(conn, rows).await
    }

    /// Counts a cashier's unsettled sessions, optionally excluding one.
    pub async fn count_unsettled_for_cashier(
        &self,
        conn: &mut SqliteConnection,
        cashier_id: &str,
        exclude_session_id: Option<&str>,
        tolerance_minor: i64,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM pos_session
            WHERE cashier_id = ?1
              AND id <> COALESCE(?2, '')
              AND (state <> 'closed'
                   OR (variance_reason IS NULL AND ABS(COALESCE(variance_minor, 0)) > ?3))
            "#,
        )
        .bind(cashier_id)
        .bind(exclude_session_id)
        .bind(tolerance_minor)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    /// Moves a session between two states that carry no extra columns.
    pub async fn set_state(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: SessionState,
        to: SessionState,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE pos_session SET state = ?3 WHERE id = ?1 AND state = ?2")
            .bind(id)
            .bind(from)
            .bind(to)
            .execute(conn)
            .await?;
        ensure_updated(result.rows_affected(), id, from)?;
        debug!(session_id = %id, %from, %to, "Session state changed");
        Ok(())
    }

    pub async fn set_base_expected(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        base_expected_minor: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE pos_session SET base_expected_cash_minor = ?2 WHERE id = ?1 AND state = 'open'",
        )
        .bind(id)
        .bind(base_expected_minor)
        .execute(conn)
        .await?;
        ensure_updated(result.rows_affected(), id, SessionState::Open)
    }

    /// `open|suspended → closing`, storing the frozen figures.
    pub async fn begin_close(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        from: SessionState,
        snapshot: &ClosingSnapshot,
    ) -> DbResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let result = sqlx::query(
            r#"
            UPDATE pos_session
            SET state = 'closing', closing_snapshot = ?3
            WHERE id = ?1 AND state = ?2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(json)
        .execute(conn)
        .await?;
        ensure_updated(result.rows_affected(), id, from)
    }

    /// `closing → open`, discarding the frozen figures.
    pub async fn abort_close(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pos_session
            SET state = 'open', closing_snapshot = NULL
            WHERE id = ?1 AND state = 'closing'
            "#,
        )
        .bind(id)
        .execute(conn)
        .await?;
        ensure_updated(result.rows_affected(), id, SessionState::Closing)
    }

    /// `closing → closed`.
    pub async fn commit_close(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        record: &CloseRecord<'_>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pos_session
            SET state = 'closed',
                total_counted_cash_minor = ?2,
                closing_cash_minor = ?3,
                variance_minor = ?4,
                variance_reason = ?5,
                closed_at = ?6
            WHERE id = ?1 AND state = 'closing'
            "#,
        )
        .bind(id)
        .bind(record.counted_minor)
        .bind(record.expected_minor)
        .bind(record.variance_minor)
        .bind(record.reason)
        .bind(record.closed_at)
        .execute(conn)
        .await?;
        ensure_updated(result.rows_affected(), id, SessionState::Closing)
    }

    /// Attaches a deferred variance reason to a closed session.
    pub async fn settle_variance(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        reason: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pos_session
            SET variance_reason = ?2
            WHERE id = ?1 AND state = 'closed' AND variance_reason IS NULL
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!(
                "session {} is not awaiting a variance reason",
                id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Cash book
    // =========================================================================

    /// Appends staged entries in order.
    pub async fn append_entries(&self, conn: &mut SqliteConnection, entries: &[CashEntry]) -> DbResult<()> {
        for entry in entries {
            debug!(
                session_id = %entry.session_id,
                seq = entry.seq,
                kind = entry.kind.as_str(),
                amount_minor = entry.amount_minor,
                "Appending cash entry"
            );
            sqlx::query(
                r#"
                INSERT INTO session_cash_entry (id, session_id, seq, kind, amount_minor, reference, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.session_id)
            .bind(entry.seq)
            .bind(entry.kind)
            .bind(entry.amount_minor)
            .bind(&entry.reference)
            .bind(entry.recorded_at)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn list_entries(&self, conn: &mut SqliteConnection, session_id: &str) -> DbResult<Vec<CashEntry>> {
        let entries = sqlx::query_as::<_, CashEntry>(
            r#"
            SELECT id, session_id, seq, kind, amount_minor, reference, recorded_at
            FROM session_cash_entry
            WHERE session_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(session_id)
        .fetch_all(conn)
        .await?;
        Ok(entries)
    }

    pub async fn load_book(&self, conn: &mut SqliteConnection, session_id: &str) -> DbResult<CashBook> {
        let entries = self.list_entries(conn, session_id).await?;
        Ok(CashBook::from_entries(session_id, entries))
    }

    // =========================================================================
    // Interim snapshots
    // =========================================================================

    pub async fn insert_snapshot(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &InterimSettlementSnapshot,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_interim_snapshot (
                id, session_id, sequence, counted_cash_minor, expected_cash_minor, variance_minor,
                drop_amount_minor, note, recorded_by, approver_id, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.session_id)
        .bind(snapshot.sequence)
        .bind(snapshot.counted_cash_minor)
        .bind(snapshot.expected_cash_minor)
        .bind(snapshot.variance_minor)
        .bind(snapshot.drop_amount_minor)
        .bind(&snapshot.note)
        .bind(&snapshot.recorded_by)
        .bind(&snapshot.approver_id)
        .bind(snapshot.recorded_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn list_snapshots(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> DbResult<Vec<InterimSettlementSnapshot>> {
        let snapshots = sqlx::query_as::<_, InterimSettlementSnapshot>(&format!(
            "SELECT {} FROM session_interim_snapshot WHERE session_id = ?1 ORDER BY sequence",
            SNAPSHOT_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(conn)
        .await?;
        Ok(snapshots)
    }

    pub async fn find_snapshot(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<InterimSettlementSnapshot>> {
        let snapshot = sqlx::query_as::<_, InterimSettlementSnapshot>(&format!(
            "SELECT {} FROM session_interim_snapshot WHERE id = ?1",
            SNAPSHOT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(snapshot)
    }

    /// Records that a drop was received. Returns `false` if it already was.
    pub async fn acknowledge_drop(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &InterimSettlementSnapshot,
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO session_drop_ack (snapshot_id, session_id, acknowledged_by, acknowledged_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.session_id)
        .bind(acknowledged_by)
        .bind(at)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drops with a non-zero amount that nobody has acknowledged yet.
    pub async fn count_pending_drops(&self, conn: &mut SqliteConnection, session_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM session_interim_snapshot s
            LEFT JOIN session_drop_ack a ON a.snapshot_id = s.id
            WHERE s.session_id = ?1 AND s.drop_amount_minor > 0 AND a.snapshot_id IS NULL
            "#,
        )
        .bind(session_id)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Sales projection
    // =========================================================================

    pub async fn insert_sale(&self, conn: &mut SqliteConnection, sale: &SessionSale) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_sale (
                id, session_id, sale_number, status, cash_minor, non_cash_minor, refund_minor,
                reference, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.session_id)
        .bind(sale.sale_number)
        .bind(sale.status)
        .bind(sale.cash_minor)
        .bind(sale.non_cash_minor)
        .bind(sale.refund_minor)
        .bind(&sale.reference)
        .bind(sale.recorded_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Rewrites a suspended or partial sale with its new totals.
    pub async fn update_sale(&self, conn: &mut SqliteConnection, sale: &SessionSale) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE session_sale
            SET status = ?2, cash_minor = ?3, non_cash_minor = ?4, refund_minor = ?5,
                reference = ?6, recorded_at = ?7
            WHERE id = ?1 AND status <> 'completed'
            "#,
        )
        .bind(&sale.id)
        .bind(sale.status)
        .bind(sale.cash_minor)
        .bind(sale.non_cash_minor)
        .bind(sale.refund_minor)
        .bind(&sale.reference)
        .bind(sale.recorded_at)
        .execute(conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!("sale {} is already completed", sale.id)));
        }
        Ok(())
    }

    pub async fn find_sale(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SessionSale>> {
        let sale = sqlx::query_as::<_, SessionSale>(&format!(
            "SELECT {} FROM session_sale WHERE id = ?1",
            SALE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;
        Ok(sale)
    }

    pub async fn list_sales(&self, conn: &mut SqliteConnection, session_id: &str) -> DbResult<Vec<SessionSale>> {
        let sales = sqlx::query_as::<_, SessionSale>(&format!(
            "SELECT {} FROM session_sale WHERE session_id = ?1 ORDER BY sale_number",
            SALE_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(conn)
        .await?;
        Ok(sales)
    }

    /// `sales_by_session`: totals and open-bill counts for one session.
    pub async fn sales_aggregate(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> DbResult<SalesAggregate> {
        let aggregate = sqlx::query_as::<_, SalesAggregate>(
            r#"
            SELECT
                COUNT(*) AS sale_count,
                COALESCE(SUM(CASE WHEN status = 'suspended' THEN 1 ELSE 0 END), 0) AS suspended_count,
                COALESCE(SUM(CASE WHEN status = 'partial' THEN 1 ELSE 0 END), 0) AS partial_count,
                COALESCE(SUM(cash_minor + non_cash_minor), 0) AS gross_sales_minor,
                COALESCE(SUM(cash_minor), 0) AS cash_sales_minor,
                COALESCE(SUM(non_cash_minor), 0) AS non_cash_sales_minor,
                COALESCE(SUM(refund_minor), 0) AS refunds_minor
            FROM session_sale
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_one(conn)
        .await?;
        Ok(aggregate)
    }

    /// Session lookup straight from the pool, for read-only endpoints.
    pub async fn get(&self, id: &str) -> DbResult<Option<Session>> {
        let mut conn = self.pool.acquire().await?;
        self.find(&mut conn, id).await
    }
}

fn ensure_updated(rows: u64, id: &str, expected: SessionState) -> DbResult<()> {
    if rows == 0 {
        return Err(DbError::conflict(format!(
            "session {} is no longer {}",
            id, expected
        )));
    }
    Ok(())
}
