//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── ErrorCode        - Stable, client-visible error codes             │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  API errors (in app)                                                   │
//! │  └── ApiError         - What clients see (serialized)                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → ApiError { code, message }        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `CoreError` maps to exactly one [`ErrorCode`]. Clients branch on the
//! code, never on the message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use ts_rs::TS;

use crate::money::Money;
use crate::types::{Role, SessionState};

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Error Codes
// =============================================================================

/// Machine-readable error codes returned by every rejected operation.
///
/// Serialized in `SCREAMING_SNAKE_CASE` (`"TERMINAL_BUSY"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ErrorCode {
    AccessDenied,
    LocationNotAccessible,
    FunctionNotAllowed,
    ApprovalRequired,
    DayNotOpen,
    DayAlreadyOpen,
    DayHasOpenSessions,
    DayHasUnsettledSessions,
    SessionNotFound,
    SessionWrongState,
    TerminalBusy,
    NotSessionOwner,
    SettlementBlockedSuspendedBills,
    SettlementBlockedPartialTxn,
    SettlementBlockedPending,
    VarianceReasonRequired,
    VarianceReasonInvalid,
    Busy,
    Conflict,
    ValidationError,
    NotFound,
    Unauthenticated,
    Internal,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::LocationNotAccessible => "LOCATION_NOT_ACCESSIBLE",
            ErrorCode::FunctionNotAllowed => "FUNCTION_NOT_ALLOWED",
            ErrorCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorCode::DayNotOpen => "DAY_NOT_OPEN",
            ErrorCode::DayAlreadyOpen => "DAY_ALREADY_OPEN",
            ErrorCode::DayHasOpenSessions => "DAY_HAS_OPEN_SESSIONS",
            ErrorCode::DayHasUnsettledSessions => "DAY_HAS_UNSETTLED_SESSIONS",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionWrongState => "SESSION_WRONG_STATE",
            ErrorCode::TerminalBusy => "TERMINAL_BUSY",
            ErrorCode::NotSessionOwner => "NOT_SESSION_OWNER",
            ErrorCode::SettlementBlockedSuspendedBills => "SETTLEMENT_BLOCKED_SUSPENDED_BILLS",
            ErrorCode::SettlementBlockedPartialTxn => "SETTLEMENT_BLOCKED_PARTIAL_TXN",
            ErrorCode::SettlementBlockedPending => "SETTLEMENT_BLOCKED_PENDING",
            ErrorCode::VarianceReasonRequired => "VARIANCE_REASON_REQUIRED",
            ErrorCode::VarianceReasonInvalid => "VARIANCE_REASON_INVALID",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations detected by the pure
/// guards in this crate. The API layer turns them into `{ code, message }`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The user's role or mapping does not permit the operation.
    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    /// The target location is not reachable for the user.
    ///
    /// ## When This Occurs
    /// - No active mapping to the location
    /// - Location type is outside the role's reach (posuser on a warehouse)
    /// - Location is deactivated
    #[error("Location {location_id} is not accessible")]
    LocationNotAccessible { location_id: String },

    /// The role-function matrix denies the function outright.
    #[error("Function {function} is not allowed for role {role}")]
    FunctionNotAllowed { function: String, role: Role },

    /// The function needs an approver whose role is in `approver_roles`.
    ///
    /// ## User Workflow
    /// ```text
    /// Cashier presses F11 (Refund)
    ///      │
    ///      ▼
    /// ApprovalRequired { approver_roles: [posmanager, admin] }
    ///      │
    ///      ▼
    /// Terminal prompts for manager credentials, retries with approver
    /// ```
    #[error("Function {function} requires approval by one of {approver_roles:?}")]
    ApprovalRequired {
        function: String,
        approver_roles: Vec<Role>,
    },

    #[error("No business day is open for location {location_id}")]
    DayNotOpen { location_id: String },

    #[error("A business day is already open for location {location_id}")]
    DayAlreadyOpen { location_id: String },

    #[error("Day {day_id} still has {open_sessions} session(s) not closed")]
    DayHasOpenSessions { day_id: String, open_sessions: usize },

    #[error("Day {day_id} has {unsettled} unsettled session(s)")]
    DayHasUnsettledSessions { day_id: String, unsettled: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session is not in a state that allows the requested operation.
    #[error("Session {session_id} is {state}, cannot {operation}")]
    SessionWrongState {
        session_id: String,
        state: SessionState,
        operation: &'static str,
    },

    /// Another session already occupies the terminal.
    #[error("Terminal {terminal_id} already has an active session")]
    TerminalBusy { terminal_id: String },

    #[error("User is not the owner of session {session_id}")]
    NotSessionOwner { session_id: String },

    #[error("Settlement blocked: {count} suspended bill(s)")]
    SettlementBlockedSuspendedBills { count: i64 },

    #[error("Settlement blocked: {count} partial transaction(s)")]
    SettlementBlockedPartialTxn { count: i64 },

    /// Pending settlement work (unacknowledged drops, unsettled sessions).
    #[error("Settlement blocked: {reason}")]
    SettlementBlockedPending { reason: String },

    #[error("Variance of {variance} requires a reason")]
    VarianceReasonRequired { variance: Money },

    #[error("Variance reason {code} is not valid: {reason}")]
    VarianceReasonInvalid { code: String, reason: String },

    /// Generic lookup failure for entities other than sessions.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// The client-visible code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::AccessDenied { .. } => ErrorCode::AccessDenied,
            CoreError::LocationNotAccessible { .. } => ErrorCode::LocationNotAccessible,
            CoreError::FunctionNotAllowed { .. } => ErrorCode::FunctionNotAllowed,
            CoreError::ApprovalRequired { .. } => ErrorCode::ApprovalRequired,
            CoreError::DayNotOpen { .. } => ErrorCode::DayNotOpen,
            CoreError::DayAlreadyOpen { .. } => ErrorCode::DayAlreadyOpen,
            CoreError::DayHasOpenSessions { .. } => ErrorCode::DayHasOpenSessions,
            CoreError::DayHasUnsettledSessions { .. } => ErrorCode::DayHasUnsettledSessions,
            CoreError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            CoreError::SessionWrongState { .. } => ErrorCode::SessionWrongState,
            CoreError::TerminalBusy { .. } => ErrorCode::TerminalBusy,
            CoreError::NotSessionOwner { .. } => ErrorCode::NotSessionOwner,
            CoreError::SettlementBlockedSuspendedBills { .. } => {
                ErrorCode::SettlementBlockedSuspendedBills
            }
            CoreError::SettlementBlockedPartialTxn { .. } => ErrorCode::SettlementBlockedPartialTxn,
            CoreError::SettlementBlockedPending { .. } => ErrorCode::SettlementBlockedPending,
            CoreError::VarianceReasonRequired { .. } => ErrorCode::VarianceReasonRequired,
            CoreError::VarianceReasonInvalid { .. } => ErrorCode::VarianceReasonInvalid,
            CoreError::NotFound { .. } => ErrorCode::NotFound,
            CoreError::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Approver roles attached to an `ApprovalRequired` error, if any.
    pub fn approver_roles(&self) -> Option<&[Role]> {
        match self {
            CoreError::ApprovalRequired { approver_roles, .. } => Some(approver_roles),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Amount must be zero or greater.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Amount has more fractional digits than the configured currency scale.
    #[error("{field} has more than {scale} decimal places")]
    TooPrecise { field: String, scale: u32 },

    /// Amount does not fit into the minor-unit range.
    #[error("{field} is out of range")]
    OutOfRange { field: String },

    /// Invalid format (e.g., unknown role name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Combination of values breaks a structural rule.
    #[error("{field}: {reason}")]
    NotAllowed { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::SettlementBlockedPartialTxn).unwrap();
        assert_eq!(json, "\"SETTLEMENT_BLOCKED_PARTIAL_TXN\"");
        assert_eq!(
            ErrorCode::SettlementBlockedPartialTxn.as_str(),
            "SETTLEMENT_BLOCKED_PARTIAL_TXN"
        );
    }

    #[test]
    fn test_as_str_matches_serde_for_all_codes() {
        let codes = [
            ErrorCode::AccessDenied,
            ErrorCode::DayHasUnsettledSessions,
            ErrorCode::TerminalBusy,
            ErrorCode::VarianceReasonInvalid,
            ErrorCode::Busy,
            ErrorCode::Unauthenticated,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }

    #[test]
    fn test_core_error_codes() {
        let err = CoreError::TerminalBusy {
            terminal_id: "T1".into(),
        };
        assert_eq!(err.code(), ErrorCode::TerminalBusy);

        let err: CoreError = ValidationError::Required {
            field: "counted_cash".into(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn test_approver_roles_only_on_approval_required() {
        let err = CoreError::ApprovalRequired {
            function: "F11".into(),
            approver_roles: vec![Role::PosManager, Role::Admin],
        };
        assert_eq!(
            err.approver_roles(),
            Some(&[Role::PosManager, Role::Admin][..])
        );
        assert!(CoreError::SessionNotFound("x".into())
            .approver_roles()
            .is_none());
    }
}
