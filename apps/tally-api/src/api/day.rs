//! Business day.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use tally_core::DayOpen;

use crate::auth::CurrentUser;
use crate::dto::{CloseDayRequest, OpenDayRequest, SessionView};
use crate::error::ApiResult;
use crate::services::day_service::DayService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().nest("/api/day", routes())
}

fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/open", post(open))
        .route("/close", post(close))
        .route("/active/{location_id}", get(active))
        .route("/unsettled/{location_id}", get(unsettled))
}

/// POST /api/day/open
async fn open(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<OpenDayRequest>,
) -> ApiResult<Json<DayOpen>> {
    let day = DayService::new(state).open(user, request).await?;
    Ok(Json(day))
}

/// POST /api/day/close
async fn close(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CloseDayRequest>,
) -> ApiResult<Json<DayOpen>> {
    let day = DayService::new(state).close(user, request).await?;
    Ok(Json(day))
}

/// GET /api/day/active/{location_id}; `null` when no day is open.
async fn active(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(location_id): Path<String>,
) -> ApiResult<Json<Option<DayOpen>>> {
    let day = DayService::new(state).active(&user, &location_id).await?;
    Ok(Json(day))
}

/// GET /api/day/unsettled/{location_id}
async fn unsettled(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(location_id): Path<String>,
) -> ApiResult<Json<Vec<SessionView>>> {
    let sessions = DayService::new(state).unsettled(&user, &location_id).await?;
    Ok(Json(sessions))
}
