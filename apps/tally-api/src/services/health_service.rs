//! Health check for monitoring and load balancers.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::dto::HealthResponse;
use crate::state::AppState;

/// Health service implementation.
pub struct HealthService {
    state: Arc<AppState>,
}

impl HealthService {
    pub fn new(state: Arc<AppState>) -> Self {
        HealthService { state }
    }

    /// Overall status; the database is the only dependency.
    pub async fn check(&self) -> HealthResponse {
        let database = self.state.db.health_check().await;
        if !database {
            warn!("Database health check failed");
        }

        HealthResponse {
            status: if database { "serving" } else { "not_serving" }.to_string(),
            database,
            server_time: Utc::now(),
        }
    }
}
