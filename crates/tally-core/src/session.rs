//! # Session Engine
//!
//! Pure guards and transition planning for cashier sessions. Each `plan_*`
//! function checks every guard against the current session and cash book and
//! returns the rows to persist; nothing is mutated, so a failed guard leaves
//! no trace.
//!
//! ## State Machine
//! ```text
//!                  record_sale / interim_settle / cash_movement
//!                           ┌──────────┐
//!                           │          │
//!   open_session ──► ┌──────┴───┐ ◄────┘      suspend       ┌───────────┐
//!                    │   open   │ ───────────────────────► │ suspended │
//!                    └──────────┘ ◄─────────────────────── └───────────┘
//!                      │     ▲             resume                │
//!           begin_close│     │abort_close                        │begin_close
//!                      ▼     │                                   │
//!                    ┌──────────┐ ◄─────────────────────────────┘
//!                    │ closing  │
//!                    └────┬─────┘
//!                         │ commit_close
//!                         ▼
//!                    ┌──────────┐   settle_variance (deferred reason)
//!                    │  closed  │ ◄──┐
//!                    └──────────┘ ───┘
//! ```

use chrono::{DateTime, Utc};

use crate::cash_book::{CashBook, CashEntry, CashEntryKind};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::functions::{FunctionCode, FunctionMatrix};
use crate::money::Money;
use crate::settlement::{self, SettlementInputs};
use crate::types::{
    ClosingSnapshot, DayOpen, InterimSettlementSnapshot, Role, SaleStatus, SalesAggregate,
    Session, SessionSale, SessionState, SettlementReason, SettlementSettings, Terminal, User,
};

// =============================================================================
// Events
// =============================================================================

/// Everything that can happen to an existing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    RecordSale,
    InterimSettle,
    CashMovement,
    Suspend,
    Resume,
    BeginClose,
    CommitClose,
    AbortClose,
    AcknowledgeDrop,
    SettleVariance,
}

impl SessionEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            SessionEvent::RecordSale => "record sale",
            SessionEvent::InterimSettle => "interim settle",
            SessionEvent::CashMovement => "record cash movement",
            SessionEvent::Suspend => "suspend",
            SessionEvent::Resume => "resume",
            SessionEvent::BeginClose => "begin close",
            SessionEvent::CommitClose => "commit close",
            SessionEvent::AbortClose => "abort close",
            SessionEvent::AcknowledgeDrop => "acknowledge drop",
            SessionEvent::SettleVariance => "settle variance",
        }
    }
}

/// The transition table. `None` means the event is not valid from `from`.
pub const fn next_state(from: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent::*;
    use SessionState::*;
    match (from, event) {
        (Open, RecordSale | InterimSettle | CashMovement) => Some(Open),
        (Open, Suspend) => Some(Suspended),
        (Suspended, Resume) => Some(Open),
        (Open | Suspended, BeginClose) => Some(Closing),
        (Closing, CommitClose) => Some(Closed),
        (Closing, AbortClose) => Some(Open),
        (Open | Suspended | Closing, AcknowledgeDrop) => Some(from),
        (Closed, SettleVariance) => Some(Closed),
        _ => None,
    }
}

/// Applies the transition table, failing with `SESSION_WRONG_STATE`.
pub fn transition(session: &Session, event: SessionEvent) -> CoreResult<SessionState> {
    next_state(session.state, event).ok_or_else(|| CoreError::SessionWrongState {
        session_id: session.id.clone(),
        state: session.state,
        operation: event.name(),
    })
}

// =============================================================================
// Actor Checks
// =============================================================================

/// A second user whose credentials have already been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approver {
    pub user_id: String,
    pub role: Role,
}

/// Checks that `actor` may run `function` on `session`.
///
/// The cashier is authorized through the function matrix. Anyone else needs
/// an approver whose role could run the function unaided; admins pass.
pub fn authorize_on_session(
    matrix: &FunctionMatrix,
    session: &Session,
    actor: &User,
    approver: Option<&Approver>,
    function: FunctionCode,
) -> CoreResult<()> {
    if actor.role.is_admin() {
        return Ok(());
    }

    if actor.id == session.cashier_id {
        return matrix
            .authorize(actor.role, function, approver.map(|a| a.role))
            .into_result(function, actor.role);
    }

    match approver {
        None => Err(CoreError::NotSessionOwner {
            session_id: session.id.clone(),
        }),
        Some(approver) => {
            let approver_roles = matrix.approver_roles(function);
            if approver_roles.contains(&approver.role) {
                Ok(())
            } else {
                Err(CoreError::ApprovalRequired {
                    function: function.to_string(),
                    approver_roles,
                })
            }
        }
    }
}

/// Ownership rule for `begin_close`.
///
/// With `require_session_ownership_to_close` only the cashier or an admin may
/// start closing; otherwise the Close Session function rules apply.
pub fn check_close_ownership(
    settings: &SettlementSettings,
    matrix: &FunctionMatrix,
    session: &Session,
    actor: &User,
    approver: Option<&Approver>,
) -> CoreResult<()> {
    if settings.require_session_ownership_to_close {
        if actor.role.is_admin() || actor.id == session.cashier_id {
            return Ok(());
        }
        return Err(CoreError::NotSessionOwner {
            session_id: session.id.clone(),
        });
    }
    authorize_on_session(matrix, session, actor, approver, FunctionCode::F12)
}

// =============================================================================
// Open
// =============================================================================

/// Guards for `open_session`; returns the day the session will belong to.
pub fn guard_open<'a>(
    terminal: &Terminal,
    day: Option<&'a DayOpen>,
    occupant: Option<&Session>,
    cashier_unsettled_sessions: i64,
    settings: &SettlementSettings,
) -> CoreResult<&'a DayOpen> {
    if !terminal.is_active {
        return Err(ValidationError::NotAllowed {
            field: "terminal_id".to_string(),
            reason: format!("terminal {} is inactive", terminal.code),
        }
        .into());
    }

    let day = day
        .filter(|d| d.is_active && d.location_id == terminal.location_id)
        .ok_or_else(|| CoreError::DayNotOpen {
            location_id: terminal.location_id.clone(),
        })?;

    if occupant.is_some_and(|s| s.state.is_active()) {
        return Err(CoreError::TerminalBusy {
            terminal_id: terminal.id.clone(),
        });
    }

    settlement::check_session_start(settings, cashier_unsettled_sessions)?;
    Ok(day)
}

/// Creates the session and its opening float entry.
pub fn start(
    day: &DayOpen,
    terminal: &Terminal,
    cashier_id: &str,
    session_number: i64,
    opening_float: Money,
    at: DateTime<Utc>,
) -> CoreResult<(Session, CashEntry)> {
    if opening_float.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "opening_float".to_string(),
        }
        .into());
    }

    let session = Session {
        id: uuid::Uuid::new_v4().to_string(),
        session_number,
        terminal_id: terminal.id.clone(),
        location_id: terminal.location_id.clone(),
        cashier_id: cashier_id.to_string(),
        day_open_id: day.id.clone(),
        state: SessionState::Open,
        opening_cash_minor: opening_float.minor(),
        base_expected_cash_minor: opening_float.minor(),
        interim_settlements: Vec::new(),
        total_counted_cash_minor: None,
        closing_cash_minor: None,
        variance_minor: None,
        variance_reason: None,
        closing_snapshot: None,
        opened_at: at,
        closed_at: None,
    };

    let float_entry = CashBook::new(&session.id).stage(
        CashEntryKind::OpeningFloat,
        opening_float,
        Some(format!("session #{}", session_number)),
        at,
    )?;

    Ok((session, float_entry))
}

// =============================================================================
// Billing & Cash Movements
// =============================================================================

/// A sale as reported by the billing front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleInput {
    pub status: SaleStatus,
    pub cash: Money,
    pub non_cash: Money,
    pub refund: Money,
    pub reference: Option<String>,
}

impl SaleInput {
    /// The function key this sale exercises.
    pub fn function(&self) -> FunctionCode {
        if self.refund.is_positive() {
            FunctionCode::F11
        } else {
            FunctionCode::F10
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalePlan {
    pub sale: SessionSale,
    pub entries: Vec<CashEntry>,
}

fn check_sale_amounts(book: &CashBook, input: &SaleInput) -> CoreResult<()> {
    for (field, amount) in [
        ("cash", input.cash),
        ("non_cash", input.non_cash),
        ("refund", input.refund),
    ] {
        if amount.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: field.to_string(),
            }
            .into());
        }
    }

    let available = book
        .expected_cash()
        .checked_add(input.cash)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "cash".to_string(),
        })?;
    if input.refund > available {
        return Err(ValidationError::NotAllowed {
            field: "refund".to_string(),
            reason: format!("refund {} exceeds cash in drawer {}", input.refund, available),
        }
        .into());
    }
    Ok(())
}

fn stage_sale_entries(
    book: &CashBook,
    input: &SaleInput,
    reference: Option<String>,
    at: DateTime<Utc>,
) -> CoreResult<Vec<CashEntry>> {
    let mut scratch = book.clone();
    let mut entries = Vec::new();
    for (kind, amount) in [
        (CashEntryKind::SaleCash, input.cash),
        (CashEntryKind::RefundCash, input.refund),
    ] {
        if amount.is_positive() {
            let entry = scratch.stage(kind, amount, reference.clone(), at)?;
            scratch.append(entry.clone());
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Plans the projection row and cash entries for one sale.
pub fn plan_sale(
    session: &Session,
    book: &CashBook,
    input: &SaleInput,
    sale_number: i64,
    at: DateTime<Utc>,
) -> CoreResult<SalePlan> {
    transition(session, SessionEvent::RecordSale)?;
    check_sale_amounts(book, input)?;

    let reference = input
        .reference
        .clone()
        .or_else(|| Some(format!("sale #{}", sale_number)));
    let entries = stage_sale_entries(book, input, reference, at)?;

    Ok(SalePlan {
        sale: SessionSale {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            sale_number,
            status: input.status,
            cash_minor: input.cash.minor(),
            non_cash_minor: input.non_cash.minor(),
            refund_minor: input.refund.minor(),
            reference: input.reference.clone(),
            recorded_at: at,
        },
        entries,
    })
}

/// Plans further payment on a suspended or partial sale of this session.
///
/// Amounts in `input` are added to what the sale already carries and the
/// status is replaced.
pub fn plan_sale_update(
    session: &Session,
    book: &CashBook,
    existing: &SessionSale,
    input: &SaleInput,
    at: DateTime<Utc>,
) -> CoreResult<SalePlan> {
    transition(session, SessionEvent::RecordSale)?;

    if existing.session_id != session.id {
        return Err(CoreError::NotFound {
            entity: "sale",
            id: existing.id.clone(),
        });
    }
    if existing.status == SaleStatus::Completed {
        return Err(ValidationError::NotAllowed {
            field: "sale_id".to_string(),
            reason: format!("sale #{} is already completed", existing.sale_number),
        }
        .into());
    }
    check_sale_amounts(book, input)?;

    let reference = input
        .reference
        .clone()
        .or_else(|| existing.reference.clone())
        .or_else(|| Some(format!("sale #{}", existing.sale_number)));
    let entries = stage_sale_entries(book, input, reference, at)?;

    Ok(SalePlan {
        sale: SessionSale {
            status: input.status,
            cash_minor: accumulate("cash", existing.cash_minor, input.cash)?,
            non_cash_minor: accumulate("non_cash", existing.non_cash_minor, input.non_cash)?,
            refund_minor: accumulate("refund", existing.refund_minor, input.refund)?,
            reference: input.reference.clone().or_else(|| existing.reference.clone()),
            recorded_at: at,
            ..existing.clone()
        },
        entries,
    })
}

fn accumulate(field: &str, existing_minor: i64, more: Money) -> CoreResult<i64> {
    Money::from_minor(existing_minor)
        .checked_add(more)
        .map(|total| total.minor())
        .ok_or_else(|| {
            ValidationError::OutOfRange {
                field: field.to_string(),
            }
            .into()
        })
}

/// Direction of a manual cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CashMovementKind {
    PayIn,
    PayOut,
}

impl CashMovementKind {
    pub const fn function(&self) -> FunctionCode {
        match self {
            CashMovementKind::PayIn => FunctionCode::AltF1,
            CashMovementKind::PayOut => FunctionCode::AltF2,
        }
    }

    pub const fn entry_kind(&self) -> CashEntryKind {
        match self {
            CashMovementKind::PayIn => CashEntryKind::PayIn,
            CashMovementKind::PayOut => CashEntryKind::PayOut,
        }
    }
}

/// Plans a pay-in or pay-out entry. A pay-out cannot exceed the book value.
pub fn plan_cash_movement(
    session: &Session,
    book: &CashBook,
    kind: CashMovementKind,
    amount: Money,
    note: Option<String>,
    at: DateTime<Utc>,
) -> CoreResult<CashEntry> {
    transition(session, SessionEvent::CashMovement)?;

    if kind == CashMovementKind::PayOut && amount > book.expected_cash() {
        return Err(ValidationError::NotAllowed {
            field: "amount".to_string(),
            reason: format!(
                "pay-out {} exceeds expected cash {}",
                amount,
                book.expected_cash()
            ),
        }
        .into());
    }

    book.stage(kind.entry_kind(), amount, note, at)
}

// =============================================================================
// Interim Settlement
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterimPlan {
    pub snapshot: InterimSettlementSnapshot,
    pub drop_entry: CashEntry,
    pub new_base_expected: Money,
}

/// Mid-session count and drop.
///
/// The variance recorded here is informational; the drawer keeps whatever
/// difference it has and it shows up again at close.
#[allow(clippy::too_many_arguments)]
pub fn plan_interim(
    session: &Session,
    book: &CashBook,
    counted: Money,
    drop: Money,
    note: Option<String>,
    recorded_by: &str,
    approver_id: Option<&str>,
    at: DateTime<Utc>,
) -> CoreResult<InterimPlan> {
    transition(session, SessionEvent::InterimSettle)?;

    if counted.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "counted_cash".to_string(),
        }
        .into());
    }
    if drop.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "drop_amount".to_string(),
        }
        .into());
    }
    if counted < drop {
        return Err(ValidationError::NotAllowed {
            field: "drop_amount".to_string(),
            reason: format!("cannot drop {} from a counted {}", drop, counted),
        }
        .into());
    }

    let expected = book.expected_cash();
    let sequence = session.interim_settlements.len() as i64 + 1;
    let snapshot = InterimSettlementSnapshot {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        sequence,
        counted_cash_minor: counted.minor(),
        expected_cash_minor: expected.minor(),
        variance_minor: (counted - expected).minor(),
        drop_amount_minor: drop.minor(),
        note,
        recorded_by: recorded_by.to_string(),
        approver_id: approver_id.map(str::to_string),
        recorded_at: at,
    };

    let drop_entry = book.stage(
        CashEntryKind::InterimDrop,
        drop,
        Some(format!("interim #{}", sequence)),
        at,
    )?;

    Ok(InterimPlan {
        snapshot,
        drop_entry,
        new_base_expected: expected - drop,
    })
}

// =============================================================================
// Close
// =============================================================================

/// Runs the settlement validator and freezes the figures for counting.
pub fn plan_begin_close(
    session: &Session,
    book: &CashBook,
    sales: SalesAggregate,
    pending_drops: i64,
    settings: &SettlementSettings,
    at: DateTime<Utc>,
) -> CoreResult<ClosingSnapshot> {
    transition(session, SessionEvent::BeginClose)?;
    settlement::validate(
        settings,
        &SettlementInputs {
            sales,
            pending_drops,
        },
    )?;

    Ok(ClosingSnapshot {
        expected_cash_minor: book.expected_cash().minor(),
        sales,
        interim_drop_total_minor: session.interim_drop_total().minor(),
        cash_entry_count: book.len() as i64,
        captured_at: at,
    })
}

/// Figures written by `commit_close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub counted: Money,
    pub expected: Money,
    pub variance: Money,
    pub reason: Option<String>,
    pub closed_at: DateTime<Utc>,
}

/// A variance reason supplied by the caller together with its lookup result.
#[derive(Debug, Clone, Copy)]
pub struct ReasonChoice<'a> {
    pub code: &'a str,
    pub found: Option<&'a SettlementReason>,
}

/// Validates a reason against the variance it should explain.
pub fn resolve_reason(choice: ReasonChoice<'_>, variance: Money) -> CoreResult<String> {
    let invalid = |reason: &str| CoreError::VarianceReasonInvalid {
        code: choice.code.to_string(),
        reason: reason.to_string(),
    };

    let reason = choice.found.ok_or_else(|| invalid("unknown reason code"))?;
    if !reason.is_active {
        return Err(invalid("reason is inactive"));
    }
    if !reason.reason_type.explains(variance) {
        return Err(invalid(&format!(
            "{:?} reason cannot explain a variance of {}",
            reason.reason_type, variance
        )));
    }
    Ok(reason.code.clone())
}

/// Computes the final variance and decides whether a reason is needed.
///
/// Beyond `tolerance` a reason is mandatory unless deferred settlement is
/// allowed, in which case the session closes unsettled and the reason is
/// supplied later through `settle_variance`.
pub fn plan_commit_close(
    session: &Session,
    book: &CashBook,
    counted: Money,
    reason: Option<ReasonChoice<'_>>,
    tolerance: Money,
    settings: &SettlementSettings,
    at: DateTime<Utc>,
) -> CoreResult<CloseOutcome> {
    transition(session, SessionEvent::CommitClose)?;

    if counted.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "counted_cash".to_string(),
        }
        .into());
    }

    let expected = book.expected_cash();
    let variance = counted - expected;

    let reason = if variance.is_zero() {
        None
    } else if let Some(choice) = reason {
        Some(resolve_reason(choice, variance)?)
    } else if variance.abs() > tolerance && !settings.allow_deferred_settlement {
        return Err(CoreError::VarianceReasonRequired { variance });
    } else {
        None
    };

    Ok(CloseOutcome {
        counted,
        expected,
        variance,
        reason,
        closed_at: at,
    })
}

/// Attaches a reason to a closed session whose variance is still open.
pub fn plan_settle_variance(
    session: &Session,
    reason: ReasonChoice<'_>,
    tolerance: Money,
) -> CoreResult<String> {
    transition(session, SessionEvent::SettleVariance)?;

    if session.is_settled(tolerance) {
        return Err(ValidationError::NotAllowed {
            field: "session_id".to_string(),
            reason: format!("session {} has no unsettled variance", session.id),
        }
        .into());
    }

    resolve_reason(reason, session.variance().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReasonType;
    use chrono::NaiveDate;

    fn day() -> DayOpen {
        DayOpen {
            id: "d1".into(),
            location_id: "store-s".into(),
            business_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            opened_by: Some("admin".into()),
            opened_at: Utc::now(),
            closed_by: None,
            closed_at: None,
            is_active: true,
            next_sale_number: 1,
            next_session_number: 1,
        }
    }

    fn terminal() -> Terminal {
        Terminal {
            id: "t1".into(),
            location_id: "store-s".into(),
            code: "T1".into(),
            name: "Till 1".into(),
            is_active: true,
        }
    }

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            username: id.into(),
            display_name: id.into(),
            role,
            is_active: true,
        }
    }

    fn short_reason() -> SettlementReason {
        SettlementReason {
            code: "SHORT".into(),
            name: "Cash short".into(),
            reason_type: ReasonType::Shortage,
            is_active: true,
        }
    }

    fn opened(float: i64) -> (Session, CashBook) {
        let (session, entry) =
            start(&day(), &terminal(), "u1", 1, Money::from_minor(float), Utc::now()).unwrap();
        let book = CashBook::from_entries(session.id.clone(), vec![entry]);
        (session, book)
    }

    fn cash_sale(session: &Session, book: &mut CashBook, cash: i64) {
        let plan = plan_sale(
            session,
            book,
            &SaleInput {
                status: SaleStatus::Completed,
                cash: Money::from_minor(cash),
                non_cash: Money::zero(),
                refund: Money::zero(),
                reference: None,
            },
            1,
            Utc::now(),
        )
        .unwrap();
        for entry in plan.entries {
            book.append(entry);
        }
    }

    fn closing(mut session: Session) -> Session {
        session.state = SessionState::Closing;
        session
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            next_state(SessionState::Open, SessionEvent::Suspend),
            Some(SessionState::Suspended)
        );
        assert_eq!(
            next_state(SessionState::Suspended, SessionEvent::BeginClose),
            Some(SessionState::Closing)
        );
        assert_eq!(
            next_state(SessionState::Closing, SessionEvent::AbortClose),
            Some(SessionState::Open)
        );
        assert_eq!(next_state(SessionState::Suspended, SessionEvent::RecordSale), None);
        assert_eq!(next_state(SessionState::Open, SessionEvent::CommitClose), None);
        assert_eq!(next_state(SessionState::Closed, SessionEvent::Resume), None);
    }

    #[test]
    fn test_guard_open_requires_day() {
        let err = guard_open(&terminal(), None, None, 0, &SettlementSettings::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::DayNotOpen);
    }

    #[test]
    fn test_guard_open_terminal_busy() {
        let d = day();
        let (occupant, _) = opened(100);
        let err = guard_open(
            &terminal(),
            Some(&d),
            Some(&occupant),
            0,
            &SettlementSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::TerminalBusy);
    }

    #[test]
    fn test_guard_open_pending_settlement() {
        let d = day();
        let err = guard_open(&terminal(), Some(&d), None, 1, &SettlementSettings::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SettlementBlockedPending);
    }

    #[test]
    fn test_start_creates_float_entry() {
        let (session, book) = opened(10000);
        assert_eq!(session.state, SessionState::Open);
        assert_eq!(book.len(), 1);
        assert_eq!(book.expected_cash().minor(), 10000);
        assert_eq!(session.base_expected_cash_minor, 10000);
    }

    #[test]
    fn test_zero_variance_close() {
        let (session, mut book) = opened(10000);
        cash_sale(&session, &mut book, 5000);
        let outcome = plan_commit_close(
            &closing(session),
            &book,
            Money::from_minor(15000),
            None,
            Money::zero(),
            &SettlementSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.variance, Money::zero());
        assert_eq!(outcome.reason, None);
    }

    #[test]
    fn test_shortage_requires_reason() {
        let (session, mut book) = opened(10000);
        cash_sale(&session, &mut book, 5000);
        let session = closing(session);
        let settings = SettlementSettings::default();

        let err = plan_commit_close(
            &session,
            &book,
            Money::from_minor(14850),
            None,
            Money::zero(),
            &settings,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::VarianceReasonRequired);

        let reason = short_reason();
        let outcome = plan_commit_close(
            &session,
            &book,
            Money::from_minor(14850),
            Some(ReasonChoice {
                code: "SHORT",
                found: Some(&reason),
            }),
            Money::zero(),
            &settings,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.variance.minor(), -150);
        assert_eq!(outcome.reason.as_deref(), Some("SHORT"));
    }

    #[test]
    fn test_reason_validation() {
        let mut inactive = short_reason();
        inactive.is_active = false;
        let err = resolve_reason(
            ReasonChoice {
                code: "SHORT",
                found: Some(&inactive),
            },
            Money::from_minor(-1),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::VarianceReasonInvalid);

        let reason = short_reason();
        assert!(resolve_reason(
            ReasonChoice {
                code: "SHORT",
                found: Some(&reason),
            },
            Money::from_minor(100),
        )
        .is_err());
        assert!(resolve_reason(
            ReasonChoice {
                code: "NOPE",
                found: None,
            },
            Money::from_minor(-1),
        )
        .is_err());
    }

    #[test]
    fn test_tolerance_and_deferral() {
        let (session, book) = opened(10000);
        let session = closing(session);

        let within = plan_commit_close(
            &session,
            &book,
            Money::from_minor(9990),
            None,
            Money::from_minor(10),
            &SettlementSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(within.variance.minor(), -10);
        assert_eq!(within.reason, None);

        let deferred = SettlementSettings {
            allow_deferred_settlement: true,
            ..Default::default()
        };
        let outcome = plan_commit_close(
            &session,
            &book,
            Money::from_minor(9000),
            None,
            Money::zero(),
            &deferred,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.reason, None);
        assert_eq!(outcome.variance.minor(), -1000);
    }

    #[test]
    fn test_interim_scenario() {
        // float 200, sales 300, count 500 and drop 400, then sale 50
        let (mut session, mut book) = opened(20000);
        cash_sale(&session, &mut book, 30000);

        let plan = plan_interim(
            &session,
            &book,
            Money::from_minor(50000),
            Money::from_minor(40000),
            Some("drop".into()),
            "u1",
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(plan.snapshot.variance_minor, 0);
        assert_eq!(plan.snapshot.sequence, 1);
        assert_eq!(plan.new_base_expected.minor(), 10000);
        book.append(plan.drop_entry);
        session.interim_settlements.push(plan.snapshot);

        cash_sale(&session, &mut book, 5000);
        let outcome = plan_commit_close(
            &closing(session),
            &book,
            Money::from_minor(15000),
            None,
            Money::zero(),
            &SettlementSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.variance, Money::zero());
    }

    #[test]
    fn test_zero_drop_keeps_expected() {
        let (mut session, mut book) = opened(10000);
        for _ in 0..2 {
            let plan = plan_interim(
                &session,
                &book,
                Money::from_minor(10000),
                Money::zero(),
                None,
                "u1",
                None,
                Utc::now(),
            )
            .unwrap();
            book.append(plan.drop_entry);
            session.interim_settlements.push(plan.snapshot);
        }
        assert_eq!(book.expected_cash().minor(), 10000);
        assert_eq!(session.interim_settlements.len(), 2);
        assert_eq!(session.interim_settlements[1].sequence, 2);
    }

    #[test]
    fn test_interim_counted_below_drop() {
        let (session, book) = opened(10000);
        assert!(plan_interim(
            &session,
            &book,
            Money::from_minor(100),
            Money::from_minor(200),
            None,
            "u1",
            None,
            Utc::now(),
        )
        .is_err());
    }

    #[test]
    fn test_sale_entries_and_refund_function() {
        let (session, book) = opened(10000);
        let input = SaleInput {
            status: SaleStatus::Completed,
            cash: Money::from_minor(500),
            non_cash: Money::from_minor(700),
            refund: Money::from_minor(200),
            reference: Some("R-1".into()),
        };
        assert_eq!(input.function(), FunctionCode::F11);
        let plan = plan_sale(&session, &book, &input, 7, Utc::now()).unwrap();
        let amounts: Vec<i64> = plan.entries.iter().map(|e| e.amount_minor).collect();
        assert_eq!(amounts, vec![500, -200]);
        let seqs: Vec<i64> = plan.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(plan.sale.sale_number, 7);
    }

    #[test]
    fn test_suspended_bill_completed_later() {
        let (session, book) = opened(10000);
        let parked = plan_sale(
            &session,
            &book,
            &SaleInput {
                status: SaleStatus::Suspended,
                cash: Money::zero(),
                non_cash: Money::zero(),
                refund: Money::zero(),
                reference: Some("B-9".into()),
            },
            3,
            Utc::now(),
        )
        .unwrap();
        assert!(parked.entries.is_empty());

        let finish = SaleInput {
            status: SaleStatus::Completed,
            cash: Money::from_minor(1200),
            non_cash: Money::from_minor(300),
            refund: Money::zero(),
            reference: None,
        };
        let plan = plan_sale_update(&session, &book, &parked.sale, &finish, Utc::now()).unwrap();
        assert_eq!(plan.sale.id, parked.sale.id);
        assert_eq!(plan.sale.sale_number, 3);
        assert_eq!(plan.sale.status, SaleStatus::Completed);
        assert_eq!(plan.sale.cash_minor, 1200);
        assert_eq!(plan.sale.reference.as_deref(), Some("B-9"));
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].seq, 2);

        assert!(plan_sale_update(&session, &book, &plan.sale, &finish, Utc::now()).is_err());
    }

    #[test]
    fn test_sale_rejected_when_suspended() {
        let (mut session, book) = opened(10000);
        session.state = SessionState::Suspended;
        let input = SaleInput {
            status: SaleStatus::Completed,
            cash: Money::from_minor(500),
            non_cash: Money::zero(),
            refund: Money::zero(),
            reference: None,
        };
        let err = plan_sale(&session, &book, &input, 1, Utc::now()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::SessionWrongState);
    }

    #[test]
    fn test_pay_out_capped_by_expected() {
        let (session, book) = opened(1000);
        assert!(plan_cash_movement(
            &session,
            &book,
            CashMovementKind::PayOut,
            Money::from_minor(1001),
            None,
            Utc::now()
        )
        .is_err());
        let entry = plan_cash_movement(
            &session,
            &book,
            CashMovementKind::PayIn,
            Money::from_minor(300),
            Some("change".into()),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(entry.amount_minor, 300);
        assert_eq!(entry.kind, CashEntryKind::PayIn);
    }

    #[test]
    fn test_begin_close_runs_validator() {
        let (session, book) = opened(1000);
        let sales = SalesAggregate {
            suspended_count: 1,
            ..Default::default()
        };
        let err = plan_begin_close(
            &session,
            &book,
            sales,
            0,
            &SettlementSettings::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::SettlementBlockedSuspendedBills
        );

        let snapshot = plan_begin_close(
            &session,
            &book,
            SalesAggregate::default(),
            0,
            &SettlementSettings::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(snapshot.expected_cash_minor, 1000);
    }

    #[test]
    fn test_authorize_on_session() {
        let matrix = FunctionMatrix::seeded();
        let (session, _) = opened(1000);
        let cashier = user("u1", Role::PosUser);
        let other = user("u2", Role::PosUser);
        let manager = Approver {
            user_id: "m1".into(),
            role: Role::PosManager,
        };

        assert!(authorize_on_session(&matrix, &session, &cashier, None, FunctionCode::AltF4).is_ok());
        assert_eq!(
            authorize_on_session(&matrix, &session, &cashier, None, FunctionCode::AltF3)
                .unwrap_err()
                .code(),
            crate::error::ErrorCode::ApprovalRequired
        );
        assert!(authorize_on_session(
            &matrix,
            &session,
            &cashier,
            Some(&manager),
            FunctionCode::AltF3
        )
        .is_ok());
        assert_eq!(
            authorize_on_session(&matrix, &session, &other, None, FunctionCode::AltF5)
                .unwrap_err()
                .code(),
            crate::error::ErrorCode::NotSessionOwner
        );
        assert!(authorize_on_session(
            &matrix,
            &session,
            &other,
            Some(&manager),
            FunctionCode::AltF5
        )
        .is_ok());
        assert!(authorize_on_session(
            &matrix,
            &session,
            &user("root", Role::Admin),
            None,
            FunctionCode::CtrlF2
        )
        .is_ok());
    }

    #[test]
    fn test_close_ownership() {
        let matrix = FunctionMatrix::seeded();
        let (session, _) = opened(1000);
        let manager = user("m1", Role::PosManager);
        let settings = SettlementSettings::default();
        assert!(check_close_ownership(&settings, &matrix, &session, &manager, None).is_err());
        assert!(check_close_ownership(
            &settings,
            &matrix,
            &session,
            &user("u1", Role::PosUser),
            None
        )
        .is_ok());
    }

    #[test]
    fn test_settle_variance() {
        let (mut session, _) = opened(1000);
        session.state = SessionState::Closed;
        session.variance_minor = Some(-150);
        session.closed_at = Some(Utc::now());
        let reason = short_reason();
        let code = plan_settle_variance(
            &session,
            ReasonChoice {
                code: "SHORT",
                found: Some(&reason),
            },
            Money::zero(),
        )
        .unwrap();
        assert_eq!(code, "SHORT");

        session.variance_reason = Some(code);
        assert!(plan_settle_variance(
            &session,
            ReasonChoice {
                code: "SHORT",
                found: Some(&reason),
            },
            Money::zero(),
        )
        .is_err());
    }
}
