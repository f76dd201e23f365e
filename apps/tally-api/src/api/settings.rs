//! Settlement settings and reasons.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use tally_core::{SettlementReason, SettlementSettings};

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::services::settings_service::SettingsService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/settings/settlement", get(get_settings).put(update_settings))
        .route("/api/settlement-reasons", get(reasons))
}

/// GET /api/settings/settlement
async fn get_settings(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> ApiResult<Json<SettlementSettings>> {
    Ok(Json(SettingsService::new(state).get().await?))
}

/// PUT /api/settings/settlement
async fn update_settings(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(settings): Json<SettlementSettings>,
) -> ApiResult<Json<SettlementSettings>> {
    let settings = SettingsService::new(state).update(&user, settings).await?;
    Ok(Json(settings))
}

/// GET /api/settlement-reasons
async fn reasons(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> ApiResult<Json<Vec<SettlementReason>>> {
    Ok(Json(SettingsService::new(state).active_reasons().await?))
}
