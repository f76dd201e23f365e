//! Request and response bodies.
//!
//! Amounts cross the wire as decimal strings at the configured scale
//! (`"125.50"`); the core works in minor units. Conversion happens here and
//! nowhere else.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_core::cash_book::{CashEntry, CashEntryKind};
use tally_core::functions::{FunctionCode, FunctionVerdict};
use tally_core::session::CashMovementKind;
use tally_core::{
    ClosingSnapshot, InterimSettlementSnapshot, Money, Operation, Role, SaleStatus, Session,
    SessionSale, SessionState, User,
};

use crate::auth::ApproverCredentials;

fn decimal(minor: i64, scale: u32) -> Decimal {
    Money::from_minor(minor).to_decimal(scale)
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: bool,
    pub server_time: DateTime<Utc>,
}

// =============================================================================
// Access & Functions
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LocationsQuery {
    #[serde(default = "default_operation")]
    pub operation: Operation,
}

fn default_operation() -> Operation {
    Operation::Pos
}

#[derive(Debug, Deserialize)]
pub struct AccessCheckRequest {
    pub operation: Operation,
    pub location_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessCheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionAuthorizeRequest {
    pub function_code: FunctionCode,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Allow,
    RequireApproval,
    Deny,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionDecision {
    pub function_code: FunctionCode,
    pub verdict: VerdictKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approver_roles: Vec<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FunctionDecision {
    pub fn new(function_code: FunctionCode, verdict: FunctionVerdict) -> Self {
        match verdict {
            FunctionVerdict::Allow => FunctionDecision {
                function_code,
                verdict: VerdictKind::Allow,
                approver_roles: Vec::new(),
                reason: None,
            },
            FunctionVerdict::RequireApproval { approver_roles } => FunctionDecision {
                function_code,
                verdict: VerdictKind::RequireApproval,
                approver_roles,
                reason: None,
            },
            FunctionVerdict::Deny { reason } => FunctionDecision {
                function_code,
                verdict: VerdictKind::Deny,
                approver_roles: Vec::new(),
                reason: Some(reason),
            },
        }
    }
}

// =============================================================================
// Day
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenDayRequest {
    pub location_id: String,
    /// Defaults to today (UTC).
    pub business_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CloseDayRequest {
    pub location_id: String,
}

// =============================================================================
// Session requests
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub terminal_id: String,
    pub opening_float: Decimal,
}

/// Body shared by suspend, resume, begin-close and abort-close.
#[derive(Debug, Deserialize)]
pub struct SessionActionRequest {
    pub session_id: String,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct RecordSaleRequest {
    pub session_id: String,
    /// Set to add payment to an earlier suspended or partial sale.
    pub sale_id: Option<String>,
    pub status: SaleStatus,
    #[serde(default)]
    pub cash: Decimal,
    #[serde(default)]
    pub non_cash: Decimal,
    #[serde(default)]
    pub refund: Decimal,
    pub reference: Option<String>,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct CashMovementRequest {
    pub session_id: String,
    pub kind: CashMovementKind,
    pub amount: Decimal,
    pub note: Option<String>,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct InterimSettleRequest {
    pub session_id: String,
    pub counted_cash: Decimal,
    #[serde(default)]
    pub drop_amount: Decimal,
    pub note: Option<String>,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct CommitCloseRequest {
    pub session_id: String,
    pub counted_cash: Decimal,
    pub reason_code: Option<String>,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeDropRequest {
    pub session_id: String,
    pub snapshot_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SettleVarianceRequest {
    pub session_id: String,
    pub reason_code: String,
    pub approver: Option<ApproverCredentials>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentSessionQuery {
    pub terminal_id: Option<String>,
}

// =============================================================================
// Session views
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub id: String,
    pub sequence: i64,
    pub counted_cash: Decimal,
    pub expected_cash: Decimal,
    pub variance: Decimal,
    pub drop_amount: Decimal,
    pub note: Option<String>,
    pub recorded_by: String,
    pub approver_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SnapshotView {
    pub fn new(snapshot: &InterimSettlementSnapshot, scale: u32) -> Self {
        SnapshotView {
            id: snapshot.id.clone(),
            sequence: snapshot.sequence,
            counted_cash: decimal(snapshot.counted_cash_minor, scale),
            expected_cash: decimal(snapshot.expected_cash_minor, scale),
            variance: decimal(snapshot.variance_minor, scale),
            drop_amount: decimal(snapshot.drop_amount_minor, scale),
            note: snapshot.note.clone(),
            recorded_by: snapshot.recorded_by.clone(),
            approver_id: snapshot.approver_id.clone(),
            recorded_at: snapshot.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosingView {
    pub expected_cash: Decimal,
    pub interim_drop_total: Decimal,
    pub sale_count: i64,
    pub suspended_count: i64,
    pub partial_count: i64,
    pub gross_sales: Decimal,
    pub cash_sales: Decimal,
    pub refunds: Decimal,
    pub cash_entry_count: i64,
    pub captured_at: DateTime<Utc>,
}

impl ClosingView {
    pub fn new(snapshot: &ClosingSnapshot, scale: u32) -> Self {
        ClosingView {
            expected_cash: decimal(snapshot.expected_cash_minor, scale),
            interim_drop_total: decimal(snapshot.interim_drop_total_minor, scale),
            sale_count: snapshot.sales.sale_count,
            suspended_count: snapshot.sales.suspended_count,
            partial_count: snapshot.sales.partial_count,
            gross_sales: decimal(snapshot.sales.gross_sales_minor, scale),
            cash_sales: decimal(snapshot.sales.cash_sales_minor, scale),
            refunds: decimal(snapshot.sales.refunds_minor, scale),
            cash_entry_count: snapshot.cash_entry_count,
            captured_at: snapshot.captured_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub session_number: i64,
    pub terminal_id: String,
    pub location_id: String,
    pub cashier_id: String,
    pub day_open_id: String,
    pub state: SessionState,
    pub opening_cash: Decimal,
    pub base_expected_cash: Decimal,
    pub total_counted_cash: Option<Decimal>,
    pub closing_cash: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub variance_reason: Option<String>,
    pub is_settled: bool,
    pub interim_settlements: Vec<SnapshotView>,
    pub closing_snapshot: Option<ClosingView>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SessionView {
    pub fn new(session: &Session, scale: u32, tolerance: Money) -> Self {
        SessionView {
            id: session.id.clone(),
            session_number: session.session_number,
            terminal_id: session.terminal_id.clone(),
            location_id: session.location_id.clone(),
            cashier_id: session.cashier_id.clone(),
            day_open_id: session.day_open_id.clone(),
            state: session.state,
            opening_cash: decimal(session.opening_cash_minor, scale),
            base_expected_cash: decimal(session.base_expected_cash_minor, scale),
            total_counted_cash: session.total_counted_cash_minor.map(|m| decimal(m, scale)),
            closing_cash: session.closing_cash_minor.map(|m| decimal(m, scale)),
            variance: session.variance_minor.map(|m| decimal(m, scale)),
            variance_reason: session.variance_reason.clone(),
            is_settled: session.is_settled(tolerance),
            interim_settlements: session
                .interim_settlements
                .iter()
                .map(|s| SnapshotView::new(s, scale))
                .collect(),
            closing_snapshot: session
                .closing_snapshot
                .as_ref()
                .map(|s| ClosingView::new(s, scale)),
            opened_at: session.opened_at,
            closed_at: session.closed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashEntryView {
    pub seq: i64,
    pub kind: CashEntryKind,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CashEntryView {
    pub fn new(entry: &CashEntry, scale: u32) -> Self {
        CashEntryView {
            seq: entry.seq,
            kind: entry.kind,
            amount: decimal(entry.amount_minor, scale),
            reference: entry.reference.clone(),
            recorded_at: entry.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleView {
    pub id: String,
    pub sale_number: i64,
    pub status: SaleStatus,
    pub cash: Decimal,
    pub non_cash: Decimal,
    pub refund: Decimal,
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SaleView {
    pub fn new(sale: &SessionSale, scale: u32) -> Self {
        SaleView {
            id: sale.id.clone(),
            sale_number: sale.sale_number,
            status: sale.status,
            cash: decimal(sale.cash_minor, scale),
            non_cash: decimal(sale.non_cash_minor, scale),
            refund: decimal(sale.refund_minor, scale),
            reference: sale.reference.clone(),
            recorded_at: sale.recorded_at,
        }
    }
}

/// `GET /api/session/{id}`: the session with its book and sales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: SessionView,
    pub expected_cash: Decimal,
    pub cash_book: Vec<CashEntryView>,
    pub sales: Vec<SaleView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleOutcome {
    pub sale: SaleView,
    pub expected_cash: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashMovementOutcome {
    pub entry: CashEntryView,
    pub expected_cash: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropAckOutcome {
    pub snapshot_id: String,
    /// `false` when the drop had already been acknowledged.
    pub newly_acknowledged: bool,
    pub pending_drops: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_amounts_render_at_scale() {
        let sale = SessionSale {
            id: "s".into(),
            session_id: "x".into(),
            sale_number: 3,
            status: SaleStatus::Completed,
            cash_minor: 12550,
            non_cash_minor: 0,
            refund_minor: 100,
            reference: None,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_value(SaleView::new(&sale, 2)).unwrap();
        assert_eq!(json["cash"], "125.50");
        assert_eq!(json["non_cash"], "0.00");
        assert_eq!(json["refund"], "1.00");
    }

    #[test]
    fn test_amounts_accept_strings_and_numbers() {
        let req: OpenSessionRequest =
            serde_json::from_str(r#"{"terminal_id":"t","opening_float":"100.00"}"#).unwrap();
        assert_eq!(req.opening_float, Decimal::new(10000, 2));

        let req: OpenSessionRequest =
            serde_json::from_str(r#"{"terminal_id":"t","opening_float":100}"#).unwrap();
        assert_eq!(req.opening_float, Decimal::new(100, 0));
    }

    #[test]
    fn test_require_approval_decision_lists_roles() {
        let decision = FunctionDecision::new(
            FunctionCode::F11,
            FunctionVerdict::RequireApproval {
                approver_roles: vec![Role::PosManager, Role::Admin],
            },
        );
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["verdict"], "require_approval");
        assert_eq!(json["function_code"], "F11");
        assert_eq!(json["approver_roles"], serde_json::json!(["posmanager", "admin"]));
    }
}
