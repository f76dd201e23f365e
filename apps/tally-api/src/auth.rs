//! JWT authentication module.
//!
//! Handles token issue and validation, the `CurrentUser` extractor and
//! verification of approver credentials.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use tally_core::session::Approver;
use tally_core::{Role, User};
use tally_db::seed::verify_password;
use tally_db::Database;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Role at the time of login. The extractor re-reads the user, so a role
    /// change takes effect on the next request.
    pub role: Role,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

/// JWT token manager.
pub struct JwtManager {
    secret: String,
    access_lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: String, access_lifetime_secs: i64) -> Self {
        JwtManager {
            secret,
            access_lifetime_secs,
        }
    }

    pub fn access_lifetime_secs(&self) -> i64 {
        self.access_lifetime_secs
    }

    /// Generate an access token.
    pub fn generate_access_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_lifetime_secs);

        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Failed to generate token: {}", e)))
    }

    /// Validate and decode a token.
    pub fn validate_token(&self, token: &str) -> ApiResult<Claims> {
        let token_data: TokenData<Claims> = decode(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| ApiError::unauthenticated(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// Extract bearer token from authorization header.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// =============================================================================
// Extractor
// =============================================================================

/// The authenticated, active user making the request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::unauthenticated("Missing authorization header"))?;

        let token = extract_bearer_token(header)
            .ok_or_else(|| ApiError::unauthenticated("Invalid authorization header"))?;

        let claims = state.jwt.validate_token(token)?;

        let mut conn = state.db.acquire().await?;
        let user = state
            .db
            .org()
            .find_user(&mut conn, &claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthenticated("Unknown user"))?;

        if !user.is_active {
            warn!(user_id = %user.id, "Token presented by inactive user");
            return Err(ApiError::unauthenticated("User is inactive"));
        }

        Ok(CurrentUser(user))
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Username and password typed in at the terminal by a supervisor.
#[derive(Debug, Clone, Deserialize)]
pub struct ApproverCredentials {
    pub username: String,
    pub password: String,
}

/// Checks a username and password; inactive users never authenticate.
pub async fn authenticate(db: &Database, username: &str, password: &str) -> ApiResult<User> {
    let credentials = db.org().find_credentials(username.trim()).await?;

    match credentials {
        Some(c) if c.user.is_active && verify_password(password, &c.password_hash) => Ok(c.user),
        _ => {
            warn!(username = %username, "Failed authentication");
            Err(ApiError::unauthenticated("Invalid username or password"))
        }
    }
}

/// Verifies the approver, if one was supplied.
///
/// Must run before the caller opens a transaction.
pub async fn verify_approver(
    db: &Database,
    credentials: Option<&ApproverCredentials>,
    actor: &User,
) -> ApiResult<Option<Approver>> {
    let Some(credentials) = credentials else {
        return Ok(None);
    };

    let approver = authenticate(db, &credentials.username, &credentials.password).await?;
    if approver.id == actor.id {
        return Err(ApiError::new(
            tally_core::ErrorCode::AccessDenied,
            "a user cannot approve their own operation",
        ));
    }

    Ok(Some(Approver {
        user_id: approver.id,
        role: approver.role,
    }))
}
