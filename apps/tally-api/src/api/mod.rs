//! # HTTP API
//!
//! ```text
//! /api/auth/login            POST   username + password ─► JWT
//! /api/health                GET
//! /api/access/...            location selection and access checks
//! /api/functions/...         function key authorization, role matrix
//! /api/day/...               business day open / close, active day, unsettled sessions
//! /api/session/...           session transitions and queries
//! /api/settings/settlement   GET / PUT (admin)
//! /api/settlement-reasons    GET
//! ```
//!
//! Every route except login and health requires `Authorization: Bearer`.

mod access;
mod auth;
mod day;
mod functions;
mod session;
mod settings;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The complete application router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(access::router())
        .merge(functions::router())
        .merge(day::router())
        .merge(session::router())
        .merge(settings::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
