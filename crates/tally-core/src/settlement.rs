//! # Settlement Validation
//!
//! Preconditions for closing a session or a day, plus the two "pending
//! settlement" gates on billing and session start.
//!
//! ```text
//! validate(settings, inputs)                 short-circuits on first failure
//!   1. check_suspended_bills        ∧ suspended > 0  → SETTLEMENT_BLOCKED_SUSPENDED_BILLS
//!   2. check_partial_transactions   ∧ partial > 0    → SETTLEMENT_BLOCKED_PARTIAL_TXN
//!   3. require_settlement_before_…  ∧ pending > 0    → SETTLEMENT_BLOCKED_PENDING
//!
//! failed_conditions(settings, inputs)        same checks, reports all of them
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::types::{SalesAggregate, SettlementSettings};

/// Everything the validator looks at for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettlementInputs {
    pub sales: SalesAggregate,
    /// Interim drops not yet acknowledged by the back office.
    pub pending_drops: i64,
}

/// Result of the non-short-circuit check, returned by the preconditions query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementPreconditions {
    pub can_settle: bool,
    pub failed: Vec<ErrorCode>,
    pub suspended_bills: i64,
    pub partial_transactions: i64,
    pub pending_drops: i64,
}

/// Checks close preconditions in order and fails on the first violation.
pub fn validate(settings: &SettlementSettings, inputs: &SettlementInputs) -> CoreResult<()> {
    if settings.check_suspended_bills && inputs.sales.suspended_count > 0 {
        return Err(CoreError::SettlementBlockedSuspendedBills {
            count: inputs.sales.suspended_count,
        });
    }
    if settings.check_partial_transactions && inputs.sales.partial_count > 0 {
        return Err(CoreError::SettlementBlockedPartialTxn {
            count: inputs.sales.partial_count,
        });
    }
    if settings.require_settlement_before_session_close && inputs.pending_drops > 0 {
        return Err(CoreError::SettlementBlockedPending {
            reason: format!("{} interim drop(s) not acknowledged", inputs.pending_drops),
        });
    }
    Ok(())
}

/// Runs every check and reports each failing code.
pub fn failed_conditions(
    settings: &SettlementSettings,
    inputs: &SettlementInputs,
) -> SettlementPreconditions {
    let mut failed = Vec::new();
    if settings.check_suspended_bills && inputs.sales.suspended_count > 0 {
        failed.push(ErrorCode::SettlementBlockedSuspendedBills);
    }
    if settings.check_partial_transactions && inputs.sales.partial_count > 0 {
        failed.push(ErrorCode::SettlementBlockedPartialTxn);
    }
    if settings.require_settlement_before_session_close && inputs.pending_drops > 0 {
        failed.push(ErrorCode::SettlementBlockedPending);
    }

    SettlementPreconditions {
        can_settle: failed.is_empty(),
        failed,
        suspended_bills: inputs.sales.suspended_count,
        partial_transactions: inputs.sales.partial_count,
        pending_drops: inputs.pending_drops,
    }
}

/// Gate on `open_session` when the cashier still has unsettled sessions.
pub fn check_session_start(settings: &SettlementSettings, unsettled_sessions: i64) -> CoreResult<()> {
    if settings.block_session_start_on_pending_settlement && unsettled_sessions > 0 {
        return Err(CoreError::SettlementBlockedPending {
            reason: format!(
                "cashier has {} unsettled session(s); settle before starting a new one",
                unsettled_sessions
            ),
        });
    }
    Ok(())
}

/// Gate on `record_sale` when the cashier has other unsettled sessions.
pub fn check_billing(settings: &SettlementSettings, other_unsettled_sessions: i64) -> CoreResult<()> {
    if settings.block_billing_on_pending_settlement && other_unsettled_sessions > 0 {
        return Err(CoreError::SettlementBlockedPending {
            reason: format!(
                "cashier has {} other unsettled session(s)",
                other_unsettled_sessions
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(suspended: i64, partial: i64, pending: i64) -> SettlementInputs {
        SettlementInputs {
            sales: SalesAggregate {
                suspended_count: suspended,
                partial_count: partial,
                ..Default::default()
            },
            pending_drops: pending,
        }
    }

    #[test]
    fn test_clean_session_passes() {
        assert!(validate(&SettlementSettings::default(), &inputs(0, 0, 0)).is_ok());
    }

    #[test]
    fn test_suspended_checked_first() {
        let err = validate(&SettlementSettings::default(), &inputs(2, 1, 0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SettlementBlockedSuspendedBills);
    }

    #[test]
    fn test_partial_when_suspended_check_off() {
        let settings = SettlementSettings {
            check_suspended_bills: false,
            ..Default::default()
        };
        let err = validate(&settings, &inputs(2, 1, 0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SettlementBlockedPartialTxn);
    }

    #[test]
    fn test_pending_drops_only_when_required() {
        assert!(validate(&SettlementSettings::default(), &inputs(0, 0, 3)).is_ok());
        let settings = SettlementSettings {
            require_settlement_before_session_close: true,
            ..Default::default()
        };
        let err = validate(&settings, &inputs(0, 0, 3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SettlementBlockedPending);
    }

    #[test]
    fn test_failed_conditions_reports_all() {
        let settings = SettlementSettings {
            require_settlement_before_session_close: true,
            ..Default::default()
        };
        let report = failed_conditions(&settings, &inputs(1, 1, 1));
        assert!(!report.can_settle);
        assert_eq!(
            report.failed,
            vec![
                ErrorCode::SettlementBlockedSuspendedBills,
                ErrorCode::SettlementBlockedPartialTxn,
                ErrorCode::SettlementBlockedPending,
            ]
        );

        let clean = failed_conditions(&settings, &inputs(0, 0, 0));
        assert!(clean.can_settle);
    }

    #[test]
    fn test_session_start_gate() {
        let settings = SettlementSettings::default();
        assert!(check_session_start(&settings, 0).is_ok());
        assert_eq!(
            check_session_start(&settings, 1).unwrap_err().code(),
            ErrorCode::SettlementBlockedPending
        );
        let relaxed = SettlementSettings {
            block_session_start_on_pending_settlement: false,
            ..Default::default()
        };
        assert!(check_session_start(&relaxed, 5).is_ok());
    }

    #[test]
    fn test_billing_gate_off_by_default() {
        assert!(check_billing(&SettlementSettings::default(), 3).is_ok());
        let strict = SettlementSettings {
            block_billing_on_pending_settlement: true,
            ..Default::default()
        };
        assert!(check_billing(&strict, 1).is_err());
    }
}
