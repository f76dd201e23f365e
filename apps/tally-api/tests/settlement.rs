//! Settlement gates: blocking sales, drop acknowledgement, deferred variance
//! and tolerance.

mod common;

use rust_decimal::Decimal;

use common::{action, code, commit, dec, sale, Fixture};
use tally_api::dto::{
    AcknowledgeDropRequest, CloseDayRequest, InterimSettleRequest, OpenSessionRequest,
    RecordSaleRequest, SessionActionRequest, SettleVarianceRequest,
};
use tally_api::services::settings_service::SettingsService;
use tally_api::ServerConfig;
use tally_core::{ErrorCode, SaleStatus, SessionState, SettlementSettings};

async fn apply_settings(f: &Fixture, settings: SettlementSettings) {
    SettingsService::new(f.state.clone())
        .update(&f.admin, settings)
        .await
        .unwrap();
}

fn settle(session_id: &str, reason: &str) -> SettleVarianceRequest {
    SettleVarianceRequest {
        session_id: session_id.to_string(),
        reason_code: reason.to_string(),
        approver: None,
    }
}

fn ack(session_id: &str, snapshot_id: &str) -> AcknowledgeDropRequest {
    AcknowledgeDropRequest {
        session_id: session_id.to_string(),
        snapshot_id: snapshot_id.to_string(),
    }
}

// =============================================================================
// Blocking sales
// =============================================================================

#[tokio::test]
async fn test_suspended_and_partial_sales_block_close() {
    let f = Fixture::new().await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;

    let suspended = f
        .sessions()
        .record_sale(f.cashier.clone(), sale(&session.id, SaleStatus::Suspended, "0"))
        .await
        .unwrap();

    let blocked = f
        .sessions()
        .begin_close(f.cashier.clone(), common::action(&session.id))
        .await;
    assert_eq!(code(blocked), ErrorCode::SettlementBlockedSuspendedBills);

    let partial = f
        .sessions()
        .record_sale(f.cashier.clone(), sale(&session.id, SaleStatus::Partial, "5.00"))
        .await
        .unwrap();

    let pre = f.sessions().preconditions(&f.cashier, &session.id).await.unwrap();
    assert!(!pre.can_settle);
    assert_eq!(
        pre.failed,
        vec![
            ErrorCode::SettlementBlockedSuspendedBills,
            ErrorCode::SettlementBlockedPartialTxn,
        ]
    );
    assert_eq!(pre.suspended_bills, 1);
    assert_eq!(pre.partial_transactions, 1);

    // recall the suspended bill and finish it
    let recalled = f
        .sessions()
        .record_sale(
            f.cashier.clone(),
            RecordSaleRequest {
                sale_id: Some(suspended.sale.id.clone()),
                ..sale(&session.id, SaleStatus::Completed, "10.00")
            },
        )
        .await
        .unwrap();
    assert_eq!(recalled.sale.sale_number, suspended.sale.sale_number);
    assert_eq!(recalled.sale.status, SaleStatus::Completed);

    let blocked = f
        .sessions()
        .begin_close(f.cashier.clone(), common::action(&session.id))
        .await;
    assert_eq!(code(blocked), ErrorCode::SettlementBlockedPartialTxn);

    let finished = f
        .sessions()
        .record_sale(
            f.cashier.clone(),
            RecordSaleRequest {
                sale_id: Some(partial.sale.id.clone()),
                ..sale(&session.id, SaleStatus::Completed, "5.00")
            },
        )
        .await
        .unwrap();
    assert_eq!(finished.sale.cash, dec("10.00"));
    assert_eq!(finished.expected_cash, dec("120.00"));

    // completed sales cannot be paid again
    let again = f
        .sessions()
        .record_sale(
            f.cashier.clone(),
            RecordSaleRequest {
                sale_id: Some(partial.sale.id.clone()),
                ..sale(&session.id, SaleStatus::Completed, "1.00")
            },
        )
        .await;
    assert_eq!(code(again), ErrorCode::ValidationError);

    let pre = f.sessions().preconditions(&f.cashier, &session.id).await.unwrap();
    assert!(pre.can_settle);
    assert!(pre.failed.is_empty());

    let closing = f.begin_close(&f.cashier, &session.id).await;
    let snapshot = closing.closing_snapshot.unwrap();
    assert_eq!(snapshot.expected_cash, dec("120.00"));
    assert_eq!(snapshot.sale_count, 2);
}

#[tokio::test]
async fn test_sale_checks_can_be_switched_off() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            check_suspended_bills: false,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    f.sessions()
        .record_sale(f.cashier.clone(), sale(&session.id, SaleStatus::Suspended, "0"))
        .await
        .unwrap();

    let closing = f.begin_close(&f.cashier, &session.id).await;
    assert_eq!(closing.state, SessionState::Closing);
}

// =============================================================================
// Interim drops
// =============================================================================

#[tokio::test]
async fn test_unacknowledged_drop_blocks_close() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            require_settlement_before_session_close: true,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;

    let after = f
        .sessions()
        .interim_settle(
            f.cashier.clone(),
            InterimSettleRequest {
                session_id: session.id.clone(),
                counted_cash: dec("100.00"),
                drop_amount: dec("30.00"),
                note: None,
                approver: f.approver(&f.manager),
            },
        )
        .await
        .unwrap();
    let snapshot_id = after.interim_settlements[0].id.clone();

    let blocked = f
        .sessions()
        .begin_close(f.cashier.clone(), common::action(&session.id))
        .await;
    assert_eq!(code(blocked), ErrorCode::SettlementBlockedPending);

    let pre = f.sessions().preconditions(&f.cashier, &session.id).await.unwrap();
    assert_eq!(pre.failed, vec![ErrorCode::SettlementBlockedPending]);
    assert_eq!(pre.pending_drops, 1);

    // a posuser has no back-office access
    let by_cashier = f
        .sessions()
        .acknowledge_drop(f.cashier.clone(), ack(&session.id, &snapshot_id))
        .await;
    assert_eq!(code(by_cashier), ErrorCode::AccessDenied);

    let unknown = f
        .sessions()
        .acknowledge_drop(f.clerk.clone(), ack(&session.id, "no-such-snapshot"))
        .await;
    assert_eq!(code(unknown), ErrorCode::NotFound);

    let first = f
        .sessions()
        .acknowledge_drop(f.clerk.clone(), ack(&session.id, &snapshot_id))
        .await
        .unwrap();
    assert!(first.newly_acknowledged);
    assert_eq!(first.pending_drops, 0);

    let second = f
        .sessions()
        .acknowledge_drop(f.manager.clone(), ack(&session.id, &snapshot_id))
        .await
        .unwrap();
    assert!(!second.newly_acknowledged);

    let closing = f.begin_close(&f.cashier, &session.id).await;
    assert_eq!(closing.closing_snapshot.unwrap().interim_drop_total, dec("30.00"));
}

#[tokio::test]
async fn test_zero_drop_needs_no_acknowledgement() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            require_settlement_before_session_close: true,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;

    let after = f
        .sessions()
        .interim_settle(
            f.cashier.clone(),
            InterimSettleRequest {
                session_id: session.id.clone(),
                counted_cash: dec("100.00"),
                drop_amount: Decimal::ZERO,
                note: Some("count only".to_string()),
                approver: f.approver(&f.manager),
            },
        )
        .await
        .unwrap();

    let result = f
        .sessions()
        .acknowledge_drop(f.clerk.clone(), ack(&session.id, &after.interim_settlements[0].id))
        .await;
    assert_eq!(code(result), ErrorCode::ValidationError);

    f.begin_close(&f.cashier, &session.id).await;
}

// =============================================================================
// Deferred settlement
// =============================================================================

#[tokio::test]
async fn test_deferred_variance_blocks_until_settled() {
    let f = Fixture::new().await;
    let deferred = SettlementSettings {
        allow_deferred_settlement: true,
        ..SettlementSettings::default()
    };
    apply_settings(&f, deferred).await;
    f.open_day().await;

    let first = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    let early = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "SHORT"))
        .await;
    assert_eq!(code(early), ErrorCode::SessionWrongState);

    f.begin_close(&f.cashier, &first.id).await;
    let closed = f
        .sessions()
        .commit_close(f.cashier.clone(), commit(&first.id, "90.00", None))
        .await
        .unwrap();
    assert_eq!(closed.state, SessionState::Closed);
    assert_eq!(closed.variance, Some(dec("-10.00")));
    assert_eq!(closed.variance_reason, None);
    assert!(!closed.is_settled);

    let second = || OpenSessionRequest {
        terminal_id: f.till_a2.id.clone(),
        opening_float: dec("50.00"),
    };
    let blocked = f.sessions().open(f.cashier.clone(), second()).await;
    assert_eq!(code(blocked), ErrorCode::SettlementBlockedPending);

    apply_settings(
        &f,
        SettlementSettings {
            allow_deferred_settlement: false,
            ..deferred
        },
    )
    .await;
    let day_close = f
        .days()
        .close(
            f.admin.clone(),
            CloseDayRequest {
                location_id: f.store_a.id.clone(),
            },
        )
        .await;
    assert_eq!(code(day_close), ErrorCode::DayHasUnsettledSessions);

    let wrong_direction = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "OVER"))
        .await;
    assert_eq!(code(wrong_direction), ErrorCode::VarianceReasonInvalid);

    let settled = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "short"))
        .await;
    // codes are case sensitive
    assert_eq!(code(settled), ErrorCode::VarianceReasonInvalid);

    let settled = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "SHORT"))
        .await
        .unwrap();
    assert_eq!(settled.variance_reason.as_deref(), Some("SHORT"));
    assert!(settled.is_settled);

    let twice = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "SHORT"))
        .await;
    assert_eq!(code(twice), ErrorCode::ValidationError);

    let blank = f
        .sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "  "))
        .await;
    assert_eq!(code(blank), ErrorCode::ValidationError);

    f.sessions().open(f.cashier.clone(), second()).await.unwrap();
}

#[tokio::test]
async fn test_billing_block_on_other_unsettled_session() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            allow_deferred_settlement: true,
            block_session_start_on_pending_settlement: false,
            block_billing_on_pending_settlement: true,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;

    let first = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    f.cash_sale(&f.cashier, &first.id, "10.00").await;
    f.begin_close(&f.cashier, &first.id).await;
    f.sessions()
        .commit_close(f.cashier.clone(), commit(&first.id, "105.00", None))
        .await
        .unwrap();

    let second = f.open_session(&f.cashier, &f.till_a2, "50.00").await;
    let blocked = f
        .sessions()
        .record_sale(f.cashier.clone(), sale(&second.id, SaleStatus::Completed, "1.00"))
        .await;
    assert_eq!(code(blocked), ErrorCode::SettlementBlockedPending);

    f.sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "SHORT"))
        .await
        .unwrap();
    f.cash_sale(&f.cashier, &second.id, "1.00").await;
}

// =============================================================================
// Tolerance
// =============================================================================

#[tokio::test]
async fn test_variance_within_tolerance_needs_no_reason() {
    let mut config = ServerConfig::default();
    config.pos.default_variance_tolerance = dec("0.50");
    let f = Fixture::with_config(config).await;
    f.open_day().await;

    let small = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    f.begin_close(&f.cashier, &small.id).await;
    let closed = f
        .sessions()
        .commit_close(f.cashier.clone(), commit(&small.id, "99.60", None))
        .await
        .unwrap();
    assert_eq!(closed.variance, Some(dec("-0.40")));
    assert_eq!(closed.variance_reason, None);
    assert!(closed.is_settled);

    let large = f.open_session(&f.cashier, &f.till_a2, "100.00").await;
    f.begin_close(&f.cashier, &large.id).await;
    let result = f
        .sessions()
        .commit_close(f.cashier.clone(), commit(&large.id, "99.00", None))
        .await;
    assert_eq!(code(result), ErrorCode::VarianceReasonRequired);
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn test_settings_are_admin_only() {
    let f = Fixture::new().await;
    let service = SettingsService::new(f.state.clone());

    let denied = service
        .update(&f.manager, SettlementSettings::default())
        .await;
    assert_eq!(code(denied), ErrorCode::AccessDenied);

    let updated = SettlementSettings {
        require_settlement_before_session_close: true,
        ..SettlementSettings::default()
    };
    service.update(&f.admin, updated).await.unwrap();
    assert_eq!(service.get().await.unwrap(), updated);

    let reasons = service.active_reasons().await.unwrap();
    let codes: Vec<&str> = reasons.iter().map(|r| r.code.as_str()).collect();
    for expected in ["SHORT", "MISCOUNT", "OVER", "OTHER"] {
        assert!(codes.contains(&expected), "missing {}", expected);
    }
}

// =============================================================================
// Close ownership
// =============================================================================

#[tokio::test]
async fn test_close_without_ownership_follows_close_function() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            require_session_ownership_to_close: false,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    let approved = |approver| SessionActionRequest {
        session_id: session.id.clone(),
        approver,
    };

    // a manager from another store is stopped at the location, approver or not
    let other_store = f
        .sessions()
        .begin_close(f.manager_b.clone(), approved(f.approver(&f.manager)))
        .await;
    assert_eq!(code(other_store), ErrorCode::LocationNotAccessible);
    let suspend = f
        .sessions()
        .suspend(f.manager_b.clone(), approved(f.approver(&f.manager)))
        .await;
    assert_eq!(code(suspend), ErrorCode::LocationNotAccessible);

    // a colleague at the same store needs an approver
    let unapproved = f
        .sessions()
        .begin_close(f.cashier2.clone(), action(&session.id))
        .await;
    assert_eq!(code(unapproved), ErrorCode::NotSessionOwner);

    let detail = f.sessions().detail(&f.cashier, &session.id).await.unwrap();
    assert_eq!(detail.session.state, SessionState::Open);

    let closing = f
        .sessions()
        .begin_close(f.cashier2.clone(), approved(f.approver(&f.manager)))
        .await
        .unwrap();
    assert_eq!(closing.state, SessionState::Closing);
}

#[tokio::test]
async fn test_close_with_ownership_checks_location_first() {
    let f = Fixture::new().await;
    f.open_day().await;
    let session = f.open_session(&f.cashier, &f.till_a1, "100.00").await;

    let other_store = f
        .sessions()
        .begin_close(f.manager_b.clone(), action(&session.id))
        .await;
    assert_eq!(code(other_store), ErrorCode::LocationNotAccessible);

    let same_store = f
        .sessions()
        .begin_close(f.manager.clone(), action(&session.id))
        .await;
    assert_eq!(code(same_store), ErrorCode::NotSessionOwner);
}

// =============================================================================
// Day reads
// =============================================================================

#[tokio::test]
async fn test_unsettled_sessions_and_day_reads() {
    let f = Fixture::new().await;
    apply_settings(
        &f,
        SettlementSettings {
            allow_deferred_settlement: true,
            ..SettlementSettings::default()
        },
    )
    .await;
    f.open_day().await;

    let first = f.open_session(&f.cashier, &f.till_a1, "100.00").await;
    let second = f.open_session(&f.cashier2, &f.till_a2, "50.00").await;

    let open = f.days().unsettled(&f.manager, &f.store_a.id).await.unwrap();
    let ids: Vec<_> = open.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);

    f.begin_close(&f.cashier2, &second.id).await;
    f.sessions()
        .commit_close(f.cashier2.clone(), commit(&second.id, "50.00", None))
        .await
        .unwrap();
    f.begin_close(&f.cashier, &first.id).await;
    f.sessions()
        .commit_close(f.cashier.clone(), commit(&first.id, "90.00", None))
        .await
        .unwrap();

    let pending = f.days().unsettled(&f.clerk, &f.store_a.id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[0].state, SessionState::Closed);
    assert!(!pending[0].is_settled);

    let other_store = f.days().unsettled(&f.manager_b, &f.store_a.id).await;
    assert_eq!(code(other_store), ErrorCode::LocationNotAccessible);
    let unmapped = f.days().unsettled(&f.cashier, &f.store_b.id).await;
    assert_eq!(code(unmapped), ErrorCode::LocationNotAccessible);

    f.sessions()
        .settle_variance(f.cashier.clone(), settle(&first.id, "SHORT"))
        .await
        .unwrap();
    assert!(f.days().unsettled(&f.manager, &f.store_a.id).await.unwrap().is_empty());

    assert!(f.days().active(&f.clerk, &f.store_a.id).await.unwrap().is_some());
    assert!(f.days().active(&f.admin, &f.store_b.id).await.unwrap().is_none());
    let hidden = f.days().active(&f.manager_b, &f.store_a.id).await;
    assert_eq!(code(hidden), ErrorCode::LocationNotAccessible);
}
