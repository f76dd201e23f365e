//! Location access.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use tally_core::access::LocationSelection;

use crate::auth::CurrentUser;
use crate::dto::{AccessCheckRequest, AccessCheckResponse, LocationsQuery};
use crate::error::ApiResult;
use crate::services::access_service::AccessService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().nest("/api/access", routes())
}

fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/locations", get(locations))
        .route("/check", post(check))
}

/// GET /api/access/locations?operation=pos
async fn locations(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<LocationsQuery>,
) -> ApiResult<Json<LocationSelection>> {
    let selection = AccessService::new(state).locations(&user, query.operation).await?;
    Ok(Json(selection))
}

/// POST /api/access/check
async fn check(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<AccessCheckRequest>,
) -> ApiResult<Json<AccessCheckResponse>> {
    let response = AccessService::new(state).check(&user, request).await?;
    Ok(Json(response))
}
