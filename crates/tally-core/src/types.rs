//! # Domain Types
//!
//! Core domain types for Tally POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Model                                    │
//! │                                                                         │
//! │  Company ──┬── Location (store, warehouse, …) ──┬── Terminal            │
//! │            │          ▲                         │                       │
//! │            │          │ UserLocationMapping     ├── DayOpen (≤1 active) │
//! │            │          │ (access_type, default)  │      │                │
//! │            └── User ──┘                         │      ▼                │
//! │                 │ role                          └── Session ── CashBook │
//! │                 ▼                                      │                │
//! │        RolePosFunctionMapping                          ▼                │
//! │                                               InterimSettlementSnapshot │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers are UUID v4 strings. Amounts are stored in minor units and
//! suffixed `_minor`; use the `Money` accessors for arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Role
// =============================================================================

/// A user's role. Exactly one per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Admin,
    BackOfficeManager,
    BackOfficeUser,
    PosManager,
    PosUser,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::BackOfficeManager,
        Role::BackOfficeUser,
        Role::PosManager,
        Role::PosUser,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::BackOfficeManager => "backofficemanager",
            Role::BackOfficeUser => "backofficeuser",
            Role::PosManager => "posmanager",
            Role::PosUser => "posuser",
        }
    }

    #[inline]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// The kinds of operation this role may perform at all.
    ///
    /// ```text
    /// admin              pos + back_office   (bypasses location checks)
    /// backofficemanager  back_office
    /// backofficeuser     back_office
    /// posmanager         pos + back_office
    /// posuser            pos
    /// ```
    pub const fn access_mode(&self) -> AccessType {
        match self {
            Role::Admin | Role::PosManager => AccessType::Both,
            Role::BackOfficeManager | Role::BackOfficeUser => AccessType::BackOffice,
            Role::PosUser => AccessType::Pos,
        }
    }

    /// Location types this role can reach through a mapping.
    pub fn reachable_location_types(&self) -> &'static [LocationType] {
        use LocationType::*;
        match self {
            Role::Admin => &[Headquarters, Store, Warehouse, Distribution, Factory, Showroom],
            Role::BackOfficeManager | Role::BackOfficeUser => {
                &[Store, Warehouse, Distribution, Factory, Showroom]
            }
            Role::PosManager => &[Store, Showroom],
            Role::PosUser => &[Store],
        }
    }

    /// Whether the role may open and close business days.
    #[inline]
    pub const fn can_manage_day(&self) -> bool {
        matches!(self, Role::Admin | Role::PosManager)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "role".to_string(),
                reason: format!("unknown role '{}'", s),
            })
    }
}

// =============================================================================
// Location
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum LocationType {
    Headquarters,
    Store,
    Warehouse,
    Distribution,
    Factory,
    Showroom,
}

/// What a user may do at a mapped location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AccessType {
    Pos,
    BackOffice,
    Both,
}

impl AccessType {
    /// Whether this access type permits an operation of the given kind.
    pub const fn covers(&self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (AccessType::Both, _)
                | (AccessType::Pos, Operation::Pos)
                | (AccessType::BackOffice, Operation::BackOffice)
        )
    }
}

/// Kind of operation an access check is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Operation {
    Pos,
    BackOffice,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Company {
    pub id: String,
    pub name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A physical site belonging to a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Location {
    pub id: String,
    pub company_id: String,
    /// Unique per company.
    pub code: String,
    pub name: String,
    pub location_type: LocationType,
    pub is_active: bool,
}

/// A POS device at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Terminal {
    pub id: String,
    pub location_id: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

// =============================================================================
// User
// =============================================================================

/// An operator of the system. Credentials live in the database layer only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
}

/// Grants a user access to one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct UserLocationMapping {
    pub id: String,
    pub user_id: String,
    pub location_id: String,
    pub access_type: AccessType,
    pub is_default: bool,
    pub is_active: bool,
}

/// A mapping joined with the location it points to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedLocation {
    pub mapping: UserLocationMapping,
    pub location: Location,
}

// =============================================================================
// Settlement Configuration
// =============================================================================

/// Global switches that gate settlement behaviour. A single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SettlementSettings {
    /// Block session/day close while suspended bills exist.
    pub check_suspended_bills: bool,
    /// Block session/day close while partially paid transactions exist.
    pub check_partial_transactions: bool,
    /// Block session close while interim drops are unacknowledged.
    pub require_settlement_before_session_close: bool,
    /// Let a day close with sessions whose variance is still unexplained.
    pub allow_deferred_settlement: bool,
    /// Only the cashier (or an approved override) may close a session.
    pub require_session_ownership_to_close: bool,
    /// Refuse new sales while the cashier has other unsettled sessions.
    pub block_billing_on_pending_settlement: bool,
    /// Refuse to open a session while the cashier has unsettled sessions.
    pub block_session_start_on_pending_settlement: bool,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        SettlementSettings {
            check_suspended_bills: true,
            check_partial_transactions: true,
            require_settlement_before_session_close: false,
            allow_deferred_settlement: false,
            require_session_ownership_to_close: true,
            block_billing_on_pending_settlement: false,
            block_session_start_on_pending_settlement: true,
        }
    }
}

/// Which direction of variance a reason explains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ReasonType {
    Shortage,
    Excess,
    Other,
}

impl ReasonType {
    /// Whether a reason of this type can explain `variance`.
    pub const fn explains(&self, variance: Money) -> bool {
        match self {
            ReasonType::Shortage => variance.is_negative(),
            ReasonType::Excess => variance.is_positive(),
            ReasonType::Other => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SettlementReason {
    pub code: String,
    pub name: String,
    pub reason_type: ReasonType,
    pub is_active: bool,
}

// =============================================================================
// Business Day
// =============================================================================

/// A business day at one location. At most one active per location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DayOpen {
    pub id: String,
    pub location_id: String,
    #[ts(as = "String")]
    pub business_date: NaiveDate,
    /// Kept as a historical reference; cleared if the user is deleted.
    pub opened_by: Option<String>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    pub closed_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Next value handed out by the sale counter.
    pub next_sale_number: i64,
    /// Next value handed out by the session counter.
    pub next_session_number: i64,
}

// =============================================================================
// Session
// =============================================================================

/// Lifecycle state of a cashier session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SessionState {
    Open,
    Suspended,
    Closing,
    Closed,
}

impl SessionState {
    /// Open, suspended and closing sessions all occupy their terminal.
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Suspended => "suspended",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a mid-session cash drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct InterimSettlementSnapshot {
    pub id: String,
    pub session_id: String,
    /// 1-based, in the order drops were taken.
    pub sequence: i64,
    pub counted_cash_minor: i64,
    /// Book value of the drawer at the moment of the count.
    pub expected_cash_minor: i64,
    /// Informational; interim variance is never settled on its own.
    pub variance_minor: i64,
    pub drop_amount_minor: i64,
    pub note: Option<String>,
    pub recorded_by: String,
    pub approver_id: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl InterimSettlementSnapshot {
    #[inline]
    pub fn drop_amount(&self) -> Money {
        Money::from_minor(self.drop_amount_minor)
    }
}

/// Sales figures for one session, read from the sales projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SalesAggregate {
    pub sale_count: i64,
    pub suspended_count: i64,
    pub partial_count: i64,
    pub gross_sales_minor: i64,
    pub cash_sales_minor: i64,
    pub non_cash_sales_minor: i64,
    pub refunds_minor: i64,
}

/// Figures frozen by `begin_close` so the count is made against a stable book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClosingSnapshot {
    pub expected_cash_minor: i64,
    pub sales: SalesAggregate,
    pub interim_drop_total_minor: i64,
    pub cash_entry_count: i64,
    #[ts(as = "String")]
    pub captured_at: DateTime<Utc>,
}

/// A cashier's working period on one terminal within one business day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    pub id: String,
    /// Unique within the business day.
    pub session_number: i64,
    pub terminal_id: String,
    pub location_id: String,
    pub cashier_id: String,
    pub day_open_id: String,
    pub state: SessionState,
    pub opening_cash_minor: i64,
    /// Cash book value through the most recent interim drop.
    pub base_expected_cash_minor: i64,
    pub interim_settlements: Vec<InterimSettlementSnapshot>,
    pub total_counted_cash_minor: Option<i64>,
    /// Expected (book) cash at the moment of close.
    pub closing_cash_minor: Option<i64>,
    pub variance_minor: Option<i64>,
    pub variance_reason: Option<String>,
    pub closing_snapshot: Option<ClosingSnapshot>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    #[inline]
    pub fn opening_cash(&self) -> Money {
        Money::from_minor(self.opening_cash_minor)
    }

    #[inline]
    pub fn variance(&self) -> Option<Money> {
        self.variance_minor.map(Money::from_minor)
    }

    /// Total cash removed by interim drops.
    pub fn interim_drop_total(&self) -> Money {
        self.interim_settlements.iter().map(|s| s.drop_amount()).sum()
    }

    /// A session is settled once closed with its variance explained or
    /// within `tolerance`.
    pub fn is_settled(&self, tolerance: Money) -> bool {
        let variance = self.variance().unwrap_or_default();
        self.state == SessionState::Closed
            && (variance.is_zero() || self.variance_reason.is_some() || variance.abs() <= tolerance)
    }
}

// =============================================================================
// Sales Projection
// =============================================================================

/// Payment status of a sale as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SaleStatus {
    /// Fully tendered.
    Completed,
    /// Parked bill awaiting recall.
    Suspended,
    /// Partly paid.
    Partial,
}

/// One sale row of the per-session projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SessionSale {
    pub id: String,
    pub session_id: String,
    /// Taken from the day's sale counter.
    pub sale_number: i64,
    pub status: SaleStatus,
    pub cash_minor: i64,
    pub non_cash_minor: i64,
    pub refund_minor: i64,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Audit
// =============================================================================

/// One row of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditEntry {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    /// `None` once the acting user has been deleted.
    pub actor_id: Option<String>,
    pub approver_id: Option<String>,
    #[ts(as = "String")]
    pub details: serde_json::Value,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_type: &str,
        entity_id: &str,
        action: &str,
        actor_id: &str,
        details: serde_json::Value,
    ) -> Self {
        AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor_id: Some(actor_id.to_string()),
            approver_id: None,
            details,
            recorded_at: Utc::now(),
        }
    }

    pub fn approved_by(mut self, approver_id: Option<&str>) -> Self {
        self.approver_id = approver_id.map(str::to_string);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("cashier".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&Role::BackOfficeManager).unwrap(),
            "\"backofficemanager\""
        );
    }

    #[test]
    fn test_access_type_covers() {
        assert!(AccessType::Both.covers(Operation::Pos));
        assert!(AccessType::Both.covers(Operation::BackOffice));
        assert!(AccessType::Pos.covers(Operation::Pos));
        assert!(!AccessType::Pos.covers(Operation::BackOffice));
        assert!(!AccessType::BackOffice.covers(Operation::Pos));
    }

    #[test]
    fn test_pos_roles_do_not_reach_warehouses() {
        assert!(!Role::PosUser
            .reachable_location_types()
            .contains(&LocationType::Warehouse));
        assert!(Role::BackOfficeUser
            .reachable_location_types()
            .contains(&LocationType::Warehouse));
        assert!(!Role::BackOfficeManager
            .reachable_location_types()
            .contains(&LocationType::Headquarters));
        assert!(!Role::PosUser
            .reachable_location_types()
            .contains(&LocationType::Showroom));
    }

    #[test]
    fn test_session_state_activity() {
        assert!(SessionState::Open.is_active());
        assert!(SessionState::Suspended.is_active());
        assert!(SessionState::Closing.is_active());
        assert!(!SessionState::Closed.is_active());
    }

    #[test]
    fn test_reason_type_explains_direction() {
        assert!(ReasonType::Shortage.explains(Money::from_minor(-150)));
        assert!(!ReasonType::Shortage.explains(Money::from_minor(150)));
        assert!(ReasonType::Excess.explains(Money::from_minor(1)));
        assert!(ReasonType::Other.explains(Money::from_minor(-1)));
    }

    #[test]
    fn test_session_settled_respects_tolerance() {
        let mut session = Session {
            id: "s1".into(),
            session_number: 1,
            terminal_id: "t1".into(),
            location_id: "l1".into(),
            cashier_id: "u1".into(),
            day_open_id: "d1".into(),
            state: SessionState::Closed,
            opening_cash_minor: 10000,
            base_expected_cash_minor: 10000,
            interim_settlements: Vec::new(),
            total_counted_cash_minor: Some(9950),
            closing_cash_minor: Some(10000),
            variance_minor: Some(-50),
            variance_reason: None,
            closing_snapshot: None,
            opened_at: Utc::now(),
            closed_at: Some(Utc::now()),
        };
        assert!(!session.is_settled(Money::zero()));
        assert!(session.is_settled(Money::from_minor(50)));
        session.variance_reason = Some("SHORT".into());
        assert!(session.is_settled(Money::zero()));
        session.state = SessionState::Closing;
        assert!(!session.is_settled(Money::zero()));
    }

    #[test]
    fn test_default_settings() {
        let s = SettlementSettings::default();
        assert!(s.check_suspended_bills);
        assert!(!s.allow_deferred_settlement);
        assert!(s.block_session_start_on_pending_settlement);
    }
}
