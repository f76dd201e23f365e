//! Login.

use std::sync::Arc;

use tracing::info;

use crate::auth::authenticate;
use crate::dto::{LoginRequest, LoginResponse};
use crate::error::ApiResult;
use crate::state::AppState;

pub struct AuthService {
    state: Arc<AppState>,
}

impl AuthService {
    pub fn new(state: Arc<AppState>) -> Self {
        AuthService { state }
    }

    /// Exchanges a username and password for an access token.
    pub async fn login(&self, request: LoginRequest) -> ApiResult<LoginResponse> {
        let user = authenticate(&self.state.db, &request.username, &request.password).await?;
        let access_token = self.state.jwt.generate_access_token(&user)?;

        info!(user_id = %user.id, role = %user.role, "User logged in");

        Ok(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.state.jwt.access_lifetime_secs(),
            user,
        })
    }
}
