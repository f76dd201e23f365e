//! Business day open and close.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use tally_core::day::{self, DaySession};
use tally_core::{AuditEntry, CoreError, DayOpen, Operation, User};

use crate::dto::{CloseDayRequest, OpenDayRequest, SessionView};
use crate::error::{ApiError, ApiResult};
use crate::locks::LockKey;
use crate::services::{require_location_access, require_location_read};
use crate::state::AppState;

pub struct DayService {
    state: Arc<AppState>,
}

impl DayService {
    pub fn new(state: Arc<AppState>) -> Self {
        DayService { state }
    }

    pub async fn open(&self, user: User, request: OpenDayRequest) -> ApiResult<DayOpen> {
        let key = LockKey::Day(request.location_id.clone());
        self.state
            .locks
            .run_locked(vec![key], open_locked(self.state.clone(), user, request))
            .await
    }

    pub async fn close(&self, user: User, request: CloseDayRequest) -> ApiResult<DayOpen> {
        let key = LockKey::Day(request.location_id.clone());
        self.state
            .locks
            .run_locked(vec![key], close_locked(self.state.clone(), user, request))
            .await
    }

    /// The active day at a location, if any.
    pub async fn active(&self, user: &User, location_id: &str) -> ApiResult<Option<DayOpen>> {
        let db = &self.state.db;
        let mut conn = db.acquire().await?;
        let location = require_location_read(db, &mut conn, user, location_id).await?;
        Ok(db.days().find_active(&mut conn, &location.id).await?)
    }

    /// Sessions at a location that still block a strict day close: active
    /// ones, and closed ones with an unexplained variance.
    pub async fn unsettled(&self, user: &User, location_id: &str) -> ApiResult<Vec<SessionView>> {
        let db = &self.state.db;
        let mut conn = db.acquire().await?;
        let location = require_location_read(db, &mut conn, user, location_id).await?;

        let sessions = db
            .sessions()
            .list_unsettled_for_location(&mut conn, &location.id, self.state.tolerance.minor())
            .await?;
        Ok(sessions
            .iter()
            .map(|s| SessionView::new(s, self.state.scale(), self.state.tolerance))
            .collect())
    }
}

async fn open_locked(state: Arc<AppState>, user: User, request: OpenDayRequest) -> ApiResult<DayOpen> {
    let db = &state.db;
    let now = Utc::now();
    let business_date = request.business_date.unwrap_or_else(|| now.date_naive());

    let mut tx = db.begin().await?;
    let location =
        require_location_access(db, &mut tx, &user, Operation::Pos, &request.location_id).await?;

    let existing = db.days().find_active(&mut tx, &location.id).await?;
    let day = day::open(&user, &location, existing.as_ref(), business_date, now)?;

    db.days().insert(&mut tx, &day).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "day_open",
                &day.id,
                "open",
                &user.id,
                json!({ "location_id": location.id, "business_date": business_date }),
            ),
        )
        .await?;
    tx.commit().await?;

    info!(
        day_id = %day.id,
        location_id = %location.id,
        business_date = %business_date,
        opened_by = %user.id,
        "Business day opened"
    );
    Ok(day)
}

async fn close_locked(state: Arc<AppState>, user: User, request: CloseDayRequest) -> ApiResult<DayOpen> {
    let db = &state.db;
    let now = Utc::now();

    let mut tx = db.begin().await?;
    let location =
        require_location_access(db, &mut tx, &user, Operation::Pos, &request.location_id).await?;

    let day = db
        .days()
        .find_active(&mut tx, &location.id)
        .await?
        .ok_or_else(|| CoreError::DayNotOpen {
            location_id: location.id.clone(),
        })?;
    let settings = db.settings().get(&mut tx).await?;

    let mut sessions = Vec::new();
    for session in db.sessions().list_for_day(&mut tx, &day.id).await? {
        let sales = db.sessions().sales_aggregate(&mut tx, &session.id).await?;
        sessions.push(DaySession { session, sales });
    }

    day::guard_close(&user, &day, &sessions, &settings, state.tolerance)?;

    db.days().close(&mut tx, &day.id, &user.id, now).await?;
    db.audit()
        .record(
            &mut tx,
            &AuditEntry::new(
                "day_open",
                &day.id,
                "close",
                &user.id,
                json!({
                    "sessions": sessions.len(),
                    "next_sale_number": day.next_sale_number,
                    "next_session_number": day.next_session_number,
                }),
            ),
        )
        .await?;

    let closed = db
        .days()
        .find(&mut tx, &day.id)
        .await?
        .ok_or_else(|| ApiError::not_found("day", &day.id))?;
    tx.commit().await?;

    info!(
        day_id = %closed.id,
        location_id = %closed.location_id,
        sessions = sessions.len(),
        closed_by = %user.id,
        "Business day closed"
    );
    Ok(closed)
}
