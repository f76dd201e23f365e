//! Login and health.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::dto::{HealthResponse, LoginRequest, LoginResponse};
use crate::error::ApiResult;
use crate::services::auth_service::AuthService;
use crate::services::health_service::HealthService;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/health", get(health))
}

/// POST /api/auth/login
async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let response = AuthService::new(state).login(request).await?;
    Ok(Json(response))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthService::new(state).check().await)
}
