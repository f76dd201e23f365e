//! Location access queries.

use std::sync::Arc;

use tally_core::access::{self, AccessVerdict, LocationSelection};
use tally_core::{Operation, User};

use crate::dto::{AccessCheckRequest, AccessCheckResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub struct AccessService {
    state: Arc<AppState>,
}

impl AccessService {
    pub fn new(state: Arc<AppState>) -> Self {
        AccessService { state }
    }

    /// Locations offered at login, the default and whether switching is allowed.
    pub async fn locations(&self, user: &User, operation: Operation) -> ApiResult<LocationSelection> {
        let db = &self.state.db;
        let all_locations = db.org().list_locations().await?;

        let mut conn = db.acquire().await?;
        let mapped = db.org().mapped_locations(&mut conn, &user.id).await?;
        let has_active_session = !db
            .sessions()
            .find_active_for_cashier(&mut conn, &user.id)
            .await?
            .is_empty();

        Ok(access::accessible_locations(
            user,
            &mapped,
            &all_locations,
            operation,
            has_active_session,
        ))
    }

    pub async fn check(&self, user: &User, request: AccessCheckRequest) -> ApiResult<AccessCheckResponse> {
        let db = &self.state.db;
        let mut conn = db.acquire().await?;

        let location = match request.location_id.as_deref() {
            Some(id) => Some(
                db.org()
                    .find_location(&mut conn, id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("location", id))?,
            ),
            None => None,
        };
        let mapped = db.org().mapped_locations(&mut conn, &user.id).await?;

        let response = match access::check(user, &mapped, request.operation, location.as_ref()) {
            AccessVerdict::Allow => AccessCheckResponse {
                allowed: true,
                reason: None,
            },
            AccessVerdict::Deny { reason, .. } => AccessCheckResponse {
                allowed: false,
                reason: Some(reason),
            },
        };
        Ok(response)
    }
}
