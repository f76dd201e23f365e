//! # Session Service
//!
//! Runs every cashier session transition.
//!
//! ## Locking
//! ```text
//! ┌──────────────────────┬───────────────────────────────────────────────┐
//! │ open                 │ Day(terminal.location) + Terminal(terminal)   │
//! │ everything else      │ Session(id)                                   │
//! └──────────────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! Amounts and notes are validated before any lock is taken; the approver's
//! password is checked before the transaction begins.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use tally_core::functions::{FunctionCode, FunctionMatrix};
use tally_core::session::{
    self, Approver, CashMovementKind, ReasonChoice, SaleInput, SessionEvent,
};
use tally_core::settlement::{self, SettlementInputs, SettlementPreconditions};
use tally_core::validation::{normalize_note, parse_amount, parse_positive_amount};
use tally_core::{
    AuditEntry, CoreError, Money, Operation, Role, Session, SettlementReason, User,
    ValidationError,
};
use tally_db::{CloseRecord, Database};

use crate::auth::verify_approver;
use crate::dto::{
    AcknowledgeDropRequest, CashEntryView, CashMovementOutcome, CashMovementRequest,
    CommitCloseRequest, DropAckOutcome, InterimSettleRequest, OpenSessionRequest,
    RecordSaleRequest, SaleOutcome, SaleView, SessionActionRequest, SessionDetail, SessionView,
    SettleVarianceRequest,
};
use crate::error::{ApiError, ApiResult};
use crate::locks::LockKey;
use crate::services::{require_location_access, require_location_read};
use crate::state::AppState;

pub struct SessionService {
    state: Arc<AppState>,
}

impl SessionService {
    pub fn new(state: Arc<AppState>) -> Self {
        SessionService { state }
    }

    /// Runs a transition under the session's lock.
    async fn run<T, Fut>(&self, session_id: &str, fut: Fut) -> ApiResult<T>
    where
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let key = LockKey::Session(session_id.to_string());
        self.state.locks.run_locked(vec![key], fut).await
    }

    // =========================================================================
    // Open
    // =========================================================================

    pub async fn open(&self, user: User, request: OpenSessionRequest) -> ApiResult<SessionView> {
        let opening_float = parse_amount("opening_float", request.opening_float, self.state.scale())?;

        let terminal = {
            let mut conn = self.state.db.acquire().await?;
            self.state
                .db
                .org()
                .find_terminal(&mut conn, &request.terminal_id)
                .await?
                .ok_or_else(|| ApiError::not_found("terminal", &request.terminal_id))?
        };

        let keys = vec![
            LockKey::Day(terminal.location_id.clone()),
            LockKey::Terminal(terminal.id.clone()),
        ];
        self.state
            .locks
            .run_locked(
                keys,
                open_locked(self.state.clone(), user, terminal.id, opening_float),
            )
            .await
    }

    // =========================================================================
    // Billing & Cash
    // =========================================================================

    pub async fn record_sale(&self, user: User, request: RecordSaleRequest) -> ApiResult<SaleOutcome> {
        let scale = self.state.scale();
        let input = SaleInput {
            status: request.status,
            cash: parse_amount("cash", request.cash, scale)?,
            non_cash: parse_amount("non_cash", request.non_cash, scale)?,
            refund: parse_amount("refund", request.refund, scale)?,
            reference: normalize_note(request.reference.as_deref())?,
        };
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;

        self.run(
            &request.session_id,
            record_sale_locked(
                self.state.clone(),
                user,
                approver,
                request.session_id.clone(),
                request.sale_id,
                input,
            ),
        )
        .await
    }

    pub async fn cash_movement(
        &self,
        user: User,
        request: CashMovementRequest,
    ) -> ApiResult<CashMovementOutcome> {
        let amount = parse_positive_amount("amount", request.amount, self.state.scale())?;
        let note = normalize_note(request.note.as_deref())?;
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;

        self.run(
            &request.session_id,
            cash_movement_locked(
                self.state.clone(),
                user,
                approver,
                request.session_id.clone(),
                request.kind,
                amount,
                note,
            ),
        )
        .await
    }

    pub async fn interim_settle(
        &self,
        user: User,
        request: InterimSettleRequest,
    ) -> ApiResult<SessionView> {
        let scale = self.state.scale();
        let counted = parse_amount("counted_cash", request.counted_cash, scale)?;
        let drop = parse_amount("drop_amount", request.drop_amount, scale)?;
        let note = normalize_note(request.note.as_deref())?;
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;

        self.run(
            &request.session_id,
            interim_locked(
                self.state.clone(),
                user,
                approver,
                request.session_id.clone(),
                counted,
                drop,
                note,
            ),
        )
        .await
    }

    // =========================================================================
    // Suspend / Resume / Abort
    // =========================================================================

    pub async fn suspend(&self, user: User, request: SessionActionRequest) -> ApiResult<SessionView> {
        self.simple(user, request, SessionEvent::Suspend).await
    }

    pub async fn resume(&self, user: User, request: SessionActionRequest) -> ApiResult<SessionView> {
        self.simple(user, request, SessionEvent::Resume).await
    }

    pub async fn abort_close(&self, user: User, request: SessionActionRequest) -> ApiResult<SessionView> {
        self.simple(user, request, SessionEvent::AbortClose).await
    }

    async fn simple(
        &self,
        user: User,
        request: SessionActionRequest,
        event: SessionEvent,
    ) -> ApiResult<SessionView> {
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;
        self.run(
            &request.session_id,
            simple_locked(self.state.clone(), user, approver, request.session_id.clone(), event),
        )
        .await
    }

    // =========================================================================
    // Close
    // =========================================================================

    pub async fn begin_close(&self, user: User, request: SessionActionRequest) -> ApiResult<SessionView> {
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;
        self.run(
            &request.session_id,
            begin_close_locked(self.state.clone(), user, approver, request.session_id.clone()),
        )
        .await
    }

    pub async fn commit_close(&self, user: User, request: CommitCloseRequest) -> ApiResult<SessionView> {
        let counted = parse_amount("counted_cash", request.counted_cash, self.state.scale())?;
        let reason_code = normalize_code(request.reason_code.as_deref());
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;

        self.run(
            &request.session_id,
            commit_close_locked(
                self.state.clone(),
                user,
                approver,
                request.session_id.clone(),
                counted,
                reason_code,
            ),
        )
        .await
    }

    pub async fn settle_variance(
        &self,
        user: User,
        request: SettleVarianceRequest,
    ) -> ApiResult<SessionView> {
        let reason_code = normalize_code(Some(&request.reason_code)).ok_or_else(|| {
            ApiError::from(ValidationError::Required {
                field: "reason_code".to_string(),
            })
        })?;
        let approver = verify_approver(&self.state.db, request.approver.as_ref(), &user).await?;

        self.run(
            &request.session_id,
            settle_variance_locked(
                self.state.clone(),
                user,
                approver,
                request.session_id.clone(),
                reason_code,
            ),
        )
        .await
    }

    pub async fn acknowledge_drop(
        &self,
        user: User,
        request: AcknowledgeDropRequest,
    ) -> ApiResult<DropAckOutcome> {
        self.run(
            &request.session_id,
            acknowledge_drop_locked(
                self.state.clone(),
                user,
                request.session_id.clone(),
                request.snapshot_id,
            ),
        )
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The active session on `terminal_id`, or the caller's own.
    pub async fn current(&self, user: &User, terminal_id: Option<&str>) -> ApiResult<Option<SessionView>> {
        let db = &self.state.db;
        let mut conn = db.acquire().await?;

        let session = match terminal_id {
            Some(terminal_id) => db.sessions().find_active_for_terminal(&mut conn, terminal_id).await?,
            None => db
                .sessions()
                .find_active_for_cashier(&mut conn, &user.id)
                .await?
                .into_iter()
                .next(),
        };

        match session {
            Some(session) => {
                require_read_access(db, &mut conn, user, &session).await?;
                Ok(Some(view(&self.state, &session)))
            }
            None => Ok(None),
        }
    }

    /// A session with its snapshots, cash book and sales.
    pub async fn detail(&self, user: &User, session_id: &str) -> ApiResult<SessionDetail> {
        let db = &self.state.db;
        let scale = self.state.scale();
        let mut conn = db.acquire().await?;

        let session = load_session(db, &mut conn, session_id).await?;
        require_read_access(db, &mut conn, user, &session).await?;

        let book = db.sessions().load_book(&mut conn, session_id).await?;
        let sales = db.sessions().list_sales(&mut conn, session_id).await?;

        Ok(SessionDetail {
            session: view(&self.state, &session),
            expected_cash: book.expected_cash().to_decimal(scale),
            cash_book: book.entries().iter().map(|e| CashEntryView::new(e, scale)).collect(),
            sales: sales.iter().map(|s| SaleView::new(s, scale)).collect(),
        })
    }

    /// Every close precondition that currently fails, without short-circuiting.
    pub async fn preconditions(&self, user: &User, session_id: &str) -> ApiResult<SettlementPreconditions> {
        let db = &self.state.db;
        let mut conn = db.acquire().await?;

        let session = load_session(db, &mut conn, session_id).await?;
        require_read_access(db, &mut conn, user, &session).await?;

        let settings = db.settings().get(&mut conn).await?;
        let sales = db.sessions().sales_aggregate(&mut conn, session_id).await?;
        let pending_drops = db.sessions().count_pending_drops(&mut conn, session_id).await?;

        Ok(settlement::failed_conditions(
            &settings,
            &SettlementInputs {
                sales,
                pending_drops,
            },
        ))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn view(state: &AppState, session: &Session) -> SessionView {
    SessionView::new(session, state.scale(), state.tolerance)
}

fn normalize_code(code: Option<&str>) -> Option<String> {
    code.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

async fn load_session(db: &Database, conn: &mut SqliteConnection, id: &str) -> ApiResult<Session> {
    db.sessions()
        .find(conn, id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(id))
}

/// Anyone other than the cashier or an admin must be able to reach the
/// session's location for POS work.
async fn require_session_location(
    db: &Database,
    conn: &mut SqliteConnection,
    session: &Session,
    actor: &User,
) -> ApiResult<()> {
    if !actor.role.is_admin() && actor.id != session.cashier_id {
        require_location_access(db, conn, actor, Operation::Pos, &session.location_id).await?;
    }
    Ok(())
}

/// Function authorization on an existing session.
async fn authorize(
    db: &Database,
    conn: &mut SqliteConnection,
    session: &Session,
    actor: &User,
    approver: Option<&Approver>,
    function: FunctionCode,
) -> ApiResult<FunctionMatrix> {
    require_session_location(db, conn, session, actor).await?;

    let matrix = db.functions().load_matrix(conn).await?;
    if let Err(e) = session::authorize_on_session(&matrix, session, actor, approver, function) {
        warn!(
            session_id = %session.id,
            actor_id = %actor.id,
            function = %function,
            error = %e,
            "Function denied"
        );
        return Err(e.into());
    }
    Ok(matrix)
}

/// Reads are open to the cashier and to anyone with POS or back-office
/// access at the session's location.
async fn require_read_access(
    db: &Database,
    conn: &mut SqliteConnection,
    user: &User,
    session: &Session,
) -> ApiResult<()> {
    if user.role.is_admin() || user.id == session.cashier_id {
        return Ok(());
    }
    require_location_read(db, conn, user, &session.location_id).await?;
    Ok(())
}

async fn find_reason(
    db: &Database,
    conn: &mut SqliteConnection,
    code: Option<&str>,
) -> ApiResult<Option<SettlementReason>> {
    match code {
        Some(code) => Ok(db.settings().find_reason(conn, code).await?),
        None => Ok(None),
    }
}

// =============================================================================
// Locked Transitions
// =============================================================================

async fn open_locked(
    state: Arc<AppState>,
    user: User,
    terminal_id: String,
    opening_float: Money,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let terminal = db
        .org()
        .find_terminal(&mut tx, &terminal_id)
        .await?
        .ok_or_else(|| ApiError::not_found("terminal", &terminal_id))?;
    let location =
        require_location_access(db, &mut tx, &user, Operation::Pos, &terminal.location_id).await?;

    let settings = db.settings().get(&mut tx).await?;
    let day = db.days().find_active(&mut tx, &location.id).await?;
    let occupant = db
        .sessions()
        .find_active_for_terminal(&mut tx, &terminal.id)
        .await?;
    let unsettled = db
        .sessions()
        .count_unsettled_for_cashier(&mut tx, &user.id, None, state.tolerance.minor())
        .await?;

    let day = session::guard_open(&terminal, day.as_ref(), occupant.as_ref(), unsettled, &settings)?;
    let session_number = db.days().take_session_number(&mut tx, &day.id).await?;
    let (session, float_entry) =
        session::start(day, &terminal, &user.id, session_number, opening_float, now)?;

    db.sessions().insert(&mut tx, &session).await?;
    db.sessions().append_entries(&mut tx, &[float_entry]).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "open",
                &user.id,
                json!({
                    "terminal_id": terminal.id,
                    "day_open_id": day.id,
                    "session_number": session_number,
                    "opening_cash_minor": opening_float.minor(),
                }),
            ),
        )
        .await?;
    tx.commit().await?;

    info!(
        session_id = %session.id,
        session_number,
        terminal_id = %terminal.id,
        cashier_id = %user.id,
        opening_float = %opening_float,
        "Session opened"
    );
    Ok(view(&state, &session))
}

async fn record_sale_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    sale_id: Option<String>,
    input: SaleInput,
) -> ApiResult<SaleOutcome> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::RecordSale)?;
    authorize(db, &mut tx, &session, &user, approver.as_ref(), input.function()).await?;

    let settings = db.settings().get(&mut tx).await?;
    let other_unsettled = db
        .sessions()
        .count_unsettled_for_cashier(
            &mut tx,
            &session.cashier_id,
            Some(&session.id),
            state.tolerance.minor(),
        )
        .await?;
    settlement::check_billing(&settings, other_unsettled)?;

    let book = db.sessions().load_book(&mut tx, &session.id).await?;
    let plan = match sale_id.as_deref() {
        Some(sale_id) => {
            let existing = db
                .sessions()
                .find_sale(&mut tx, sale_id)
                .await?
                .ok_or_else(|| CoreError::NotFound {
                    entity: "sale",
                    id: sale_id.to_string(),
                })?;
            let plan = session::plan_sale_update(&session, &book, &existing, &input, now)?;
            db.sessions().update_sale(&mut tx, &plan.sale).await?;
            plan
        }
        None => {
            let sale_number = db.days().take_sale_number(&mut tx, &session.day_open_id).await?;
            let plan = session::plan_sale(&session, &book, &input, sale_number, now)?;
            db.sessions().insert_sale(&mut tx, &plan.sale).await?;
            plan
        }
    };

    db.sessions().append_entries(&mut tx, &plan.entries).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "record_sale",
                &user.id,
                json!({
                    "sale_id": plan.sale.id,
                    "sale_number": plan.sale.sale_number,
                    "status": plan.sale.status,
                    "cash_minor": input.cash.minor(),
                    "non_cash_minor": input.non_cash.minor(),
                    "refund_minor": input.refund.minor(),
                }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;
    tx.commit().await?;

    let expected = book.expected_cash() + plan.entries.iter().map(|e| e.amount()).sum::<Money>();
    info!(
        session_id = %session.id,
        sale_number = plan.sale.sale_number,
        status = ?plan.sale.status,
        expected_cash = %expected,
        "Sale recorded"
    );

    let scale = state.scale();
    Ok(SaleOutcome {
        sale: SaleView::new(&plan.sale, scale),
        expected_cash: expected.to_decimal(scale),
    })
}

async fn cash_movement_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    kind: CashMovementKind,
    amount: Money,
    note: Option<String>,
) -> ApiResult<CashMovementOutcome> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::CashMovement)?;
    authorize(db, &mut tx, &session, &user, approver.as_ref(), kind.function()).await?;

    let book = db.sessions().load_book(&mut tx, &session.id).await?;
    let entry = session::plan_cash_movement(&session, &book, kind, amount, note, now)?;

    db.sessions().append_entries(&mut tx, std::slice::from_ref(&entry)).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "cash_movement",
                &user.id,
                json!({ "kind": kind, "amount_minor": entry.amount_minor, "seq": entry.seq }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;
    tx.commit().await?;

    let expected = book.expected_cash() + entry.amount();
    info!(
        session_id = %session.id,
        kind = ?kind,
        amount = %amount,
        expected_cash = %expected,
        "Cash movement recorded"
    );

    let scale = state.scale();
    Ok(CashMovementOutcome {
        entry: CashEntryView::new(&entry, scale),
        expected_cash: expected.to_decimal(scale),
    })
}

async fn interim_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    counted: Money,
    drop: Money,
    note: Option<String>,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::InterimSettle)?;
    authorize(db, &mut tx, &session, &user, approver.as_ref(), FunctionCode::AltF3).await?;

    let book = db.sessions().load_book(&mut tx, &session.id).await?;
    let approver_id = approver.as_ref().map(|a| a.user_id.as_str());
    let plan = session::plan_interim(&session, &book, counted, drop, note, &user.id, approver_id, now)?;

    db.sessions().insert_snapshot(&mut tx, &plan.snapshot).await?;
    db.sessions()
        .append_entries(&mut tx, std::slice::from_ref(&plan.drop_entry))
        .await?;
    db.sessions()
        .set_base_expected(&mut tx, &session.id, plan.new_base_expected.minor())
        .await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "interim_settle",
                &user.id,
                json!({
                    "snapshot_id": plan.snapshot.id,
                    "sequence": plan.snapshot.sequence,
                    "counted_cash_minor": plan.snapshot.counted_cash_minor,
                    "expected_cash_minor": plan.snapshot.expected_cash_minor,
                    "drop_amount_minor": plan.snapshot.drop_amount_minor,
                }),
            )
            .approved_by(approver_id),
        )
        .await?;

    let updated = load_session(db, &mut tx, &session.id).await?;
    tx.commit().await?;

    info!(
        session_id = %session.id,
        sequence = plan.snapshot.sequence,
        counted = %counted,
        dropped = %drop,
        interim_variance = plan.snapshot.variance_minor,
        base_expected = %plan.new_base_expected,
        "Interim settlement recorded"
    );
    Ok(view(&state, &updated))
}

async fn simple_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    event: SessionEvent,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    let to = session::transition(&session, event)?;

    let (function, action) = match event {
        SessionEvent::Suspend => (FunctionCode::AltF4, "suspend"),
        SessionEvent::Resume => (FunctionCode::AltF5, "resume"),
        _ => (FunctionCode::F12, "abort_close"),
    };
    authorize(db, &mut tx, &session, &user, approver.as_ref(), function).await?;

    if event == SessionEvent::AbortClose {
        db.sessions().abort_close(&mut tx, &session.id).await?;
    } else {
        db.sessions()
            .set_state(&mut tx, &session.id, session.state, to)
            .await?;
    }
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                action,
                &user.id,
                json!({ "from": session.state, "to": to }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;

    let updated = load_session(db, &mut tx, &session.id).await?;
    tx.commit().await?;

    info!(
        session_id = %session.id,
        from = %session.state,
        to = %to,
        actor_id = %user.id,
        "Session {}",
        event.name()
    );
    Ok(view(&state, &updated))
}

async fn begin_close_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::BeginClose)?;
    require_session_location(db, &mut tx, &session, &user).await?;

    let settings = db.settings().get(&mut tx).await?;
    let matrix = db.functions().load_matrix(&mut tx).await?;
    session::check_close_ownership(&settings, &matrix, &session, &user, approver.as_ref())?;

    let sales = db.sessions().sales_aggregate(&mut tx, &session.id).await?;
    let pending_drops = db.sessions().count_pending_drops(&mut tx, &session.id).await?;
    let book = db.sessions().load_book(&mut tx, &session.id).await?;

    let snapshot = match session::plan_begin_close(&session, &book, sales, pending_drops, &settings, now) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(session_id = %session.id, error = %e, "Close blocked");
            return Err(e.into());
        }
    };

    db.sessions()
        .begin_close(&mut tx, &session.id, session.state, &snapshot)
        .await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "begin_close",
                &user.id,
                json!({
                    "from": session.state,
                    "expected_cash_minor": snapshot.expected_cash_minor,
                    "sale_count": snapshot.sales.sale_count,
                }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;

    let updated = load_session(db, &mut tx, &session.id).await?;
    tx.commit().await?;

    info!(
        session_id = %session.id,
        expected_cash_minor = snapshot.expected_cash_minor,
        "Session closing"
    );
    Ok(view(&state, &updated))
}

async fn commit_close_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    counted: Money,
    reason_code: Option<String>,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::CommitClose)?;
    authorize(db, &mut tx, &session, &user, approver.as_ref(), FunctionCode::F12).await?;

    let settings = db.settings().get(&mut tx).await?;
    let book = db.sessions().load_book(&mut tx, &session.id).await?;
    let found = find_reason(db, &mut tx, reason_code.as_deref()).await?;
    let choice = reason_code.as_deref().map(|code| ReasonChoice {
        code,
        found: found.as_ref(),
    });

    let outcome =
        session::plan_commit_close(&session, &book, counted, choice, state.tolerance, &settings, now)?;

    db.sessions()
        .commit_close(
            &mut tx,
            &session.id,
            &CloseRecord {
                counted_minor: outcome.counted.minor(),
                expected_minor: outcome.expected.minor(),
                variance_minor: outcome.variance.minor(),
                reason: outcome.reason.as_deref(),
                closed_at: outcome.closed_at,
            },
        )
        .await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "commit_close",
                &user.id,
                json!({
                    "counted_minor": outcome.counted.minor(),
                    "expected_minor": outcome.expected.minor(),
                    "variance_minor": outcome.variance.minor(),
                    "reason": outcome.reason,
                }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;

    let closed = load_session(db, &mut tx, &session.id).await?;
    tx.commit().await?;

    if !closed.is_settled(state.tolerance) {
        warn!(
            session_id = %closed.id,
            variance = %outcome.variance,
            "Session closed with unsettled variance"
        );
    }
    info!(
        session_id = %closed.id,
        counted = %outcome.counted,
        expected = %outcome.expected,
        variance = %outcome.variance,
        reason = ?outcome.reason,
        "Session closed"
    );
    Ok(view(&state, &closed))
}

async fn settle_variance_locked(
    state: Arc<AppState>,
    user: User,
    approver: Option<Approver>,
    session_id: String,
    reason_code: String,
) -> ApiResult<SessionView> {
    let db = &state.db;
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::SettleVariance)?;
    authorize(db, &mut tx, &session, &user, approver.as_ref(), FunctionCode::F12).await?;

    let found = db.settings().find_reason(&mut tx, &reason_code).await?;
    let reason = session::plan_settle_variance(
        &session,
        ReasonChoice {
            code: &reason_code,
            found: found.as_ref(),
        },
        state.tolerance,
    )?;

    db.sessions().settle_variance(&mut tx, &session.id, &reason).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "pos_session",
                &session.id,
                "settle_variance",
                &user.id,
                json!({ "reason": reason, "variance_minor": session.variance_minor }),
            )
            .approved_by(approver.as_ref().map(|a| a.user_id.as_str())),
        )
        .await?;

    let settled = load_session(db, &mut tx, &session.id).await?;
    tx.commit().await?;

    info!(session_id = %settled.id, reason = %reason, "Variance settled");
    Ok(view(&state, &settled))
}

async fn acknowledge_drop_locked(
    state: Arc<AppState>,
    user: User,
    session_id: String,
    snapshot_id: String,
) -> ApiResult<DropAckOutcome> {
    let db = &state.db;
    let now = Utc::now();
    let mut tx = db.begin().await?;

    let session = load_session(db, &mut tx, &session_id).await?;
    session::transition(&session, SessionEvent::AcknowledgeDrop)?;

    // pos managers confirm drops from the till; everyone else needs back office
    let operation = if user.role == Role::PosManager {
        Operation::Pos
    } else {
        Operation::BackOffice
    };
    require_location_access(db, &mut tx, &user, operation, &session.location_id).await?;

    let snapshot = db
        .sessions()
        .find_snapshot(&mut tx, &snapshot_id)
        .await?
        .filter(|s| s.session_id == session.id)
        .ok_or_else(|| ApiError::not_found("interim snapshot", &snapshot_id))?;
    if !snapshot.drop_amount().is_positive() {
        return Err(ValidationError::NotAllowed {
            field: "snapshot_id".to_string(),
            reason: format!("interim #{} dropped no cash", snapshot.sequence),
        }
        .into());
    }

    let newly_acknowledged = db
        .sessions()
        .acknowledge_drop(&mut tx, &snapshot, &user.id, now)
        .await?;
    if newly_acknowledged {
        db.audit()
            .record(
                &mut tx,
                &AuditEntry::new(
                    "pos_session",
                    &session.id,
                    "acknowledge_drop",
                    &user.id,
                    json!({
                        "snapshot_id": snapshot.id,
                        "drop_amount_minor": snapshot.drop_amount_minor,
                    }),
                ),
            )
            .await?;
    }
    let pending_drops = db.sessions().count_pending_drops(&mut tx, &session.id).await?;
    tx.commit().await?;

    info!(
        session_id = %session.id,
        snapshot_id = %snapshot.id,
        newly_acknowledged,
        pending_drops,
        "Drop acknowledged"
    );
    Ok(DropAckOutcome {
        snapshot_id: snapshot.id,
        newly_acknowledged,
        pending_drops,
    })
}
