//! Session transitions and queries.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use tally_core::settlement::SettlementPreconditions;

use crate::auth::CurrentUser;
use crate::dto::{
    AcknowledgeDropRequest, CashMovementOutcome, CashMovementRequest, CommitCloseRequest,
    CurrentSessionQuery, DropAckOutcome, InterimSettleRequest, OpenSessionRequest,
    RecordSaleRequest, SaleOutcome, SessionActionRequest, SessionDetail, SessionView,
    SettleVarianceRequest,
};
use crate::error::ApiResult;
use crate::services::session_service::SessionService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().nest("/api/session", routes())
}

fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/open", post(open))
        .route("/record-sale", post(record_sale))
        .route("/cash-movement", post(cash_movement))
        .route("/interim-settle", post(interim_settle))
        .route("/suspend", post(suspend))
        .route("/resume", post(resume))
        .route("/begin-close", post(begin_close))
        .route("/commit-close", post(commit_close))
        .route("/abort-close", post(abort_close))
        .route("/acknowledge-drop", post(acknowledge_drop))
        .route("/settle-variance", post(settle_variance))
        .route("/current", get(current))
        .route("/{id}", get(detail))
        .route("/{id}/settlement-preconditions", get(preconditions))
}

/// POST /api/session/open
async fn open(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).open(user, request).await?))
}

/// POST /api/session/record-sale
async fn record_sale(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<RecordSaleRequest>,
) -> ApiResult<Json<SaleOutcome>> {
    Ok(Json(SessionService::new(state).record_sale(user, request).await?))
}

/// POST /api/session/cash-movement
async fn cash_movement(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CashMovementRequest>,
) -> ApiResult<Json<CashMovementOutcome>> {
    Ok(Json(SessionService::new(state).cash_movement(user, request).await?))
}

/// POST /api/session/interim-settle
async fn interim_settle(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<InterimSettleRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).interim_settle(user, request).await?))
}

/// POST /api/session/suspend
async fn suspend(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SessionActionRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).suspend(user, request).await?))
}

/// POST /api/session/resume
async fn resume(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SessionActionRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).resume(user, request).await?))
}

/// POST /api/session/begin-close
async fn begin_close(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SessionActionRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).begin_close(user, request).await?))
}

/// POST /api/session/commit-close
async fn commit_close(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CommitCloseRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).commit_close(user, request).await?))
}

/// POST /api/session/abort-close
async fn abort_close(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SessionActionRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).abort_close(user, request).await?))
}

/// POST /api/session/acknowledge-drop
async fn acknowledge_drop(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<AcknowledgeDropRequest>,
) -> ApiResult<Json<DropAckOutcome>> {
    Ok(Json(SessionService::new(state).acknowledge_drop(user, request).await?))
}

/// POST /api/session/settle-variance
async fn settle_variance(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SettleVarianceRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(SessionService::new(state).settle_variance(user, request).await?))
}

/// GET /api/session/current?terminal_id=
///
/// Without `terminal_id`, the caller's own active session.
async fn current(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<CurrentSessionQuery>,
) -> ApiResult<Json<Option<SessionView>>> {
    let session = SessionService::new(state)
        .current(&user, query.terminal_id.as_deref())
        .await?;
    Ok(Json(session))
}

/// GET /api/session/{id}
async fn detail(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionDetail>> {
    Ok(Json(SessionService::new(state).detail(&user, &id).await?))
}

/// GET /api/session/{id}/settlement-preconditions
async fn preconditions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<SettlementPreconditions>> {
    Ok(Json(SessionService::new(state).preconditions(&user, &id).await?))
}
