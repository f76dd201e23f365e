//! POS function keys.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use tally_core::functions::RolePosFunctionMapping;

use crate::auth::CurrentUser;
use crate::dto::{FunctionAuthorizeRequest, FunctionDecision};
use crate::error::ApiResult;
use crate::services::function_service::FunctionService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().nest("/api/functions", routes())
}

fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/authorize", post(authorize))
        .route("/mappings", get(list_mappings).put(upsert_mapping))
}

/// POST /api/functions/authorize
async fn authorize(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<FunctionAuthorizeRequest>,
) -> ApiResult<Json<FunctionDecision>> {
    let decision = FunctionService::new(state).authorize(&user, request).await?;
    Ok(Json(decision))
}

/// GET /api/functions/mappings
async fn list_mappings(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> ApiResult<Json<Vec<RolePosFunctionMapping>>> {
    let mappings = FunctionService::new(state).list_mappings().await?;
    Ok(Json(mappings))
}

/// PUT /api/functions/mappings
async fn upsert_mapping(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(mapping): Json<RolePosFunctionMapping>,
) -> ApiResult<Json<RolePosFunctionMapping>> {
    let mapping = FunctionService::new(state).upsert_mapping(&user, mapping).await?;
    Ok(Json(mapping))
}
