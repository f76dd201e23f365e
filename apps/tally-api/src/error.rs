//! Error type returned by every endpoint.
//!
//! ```text
//! ValidationError ─┐
//! CoreError ───────┼──► ApiError { code, message, approver_roles? } ──► HTTP status + JSON
//! DbError ─────────┘
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use tally_core::{CoreError, ErrorCode, Role, ValidationError};
use tally_db::DbError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Serialized as `{"code": "...", "message": "...", "approver_roles": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_roles: Option<Vec<Role>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            approver_roles: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Busy, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found: {}", entity, id))
    }

    pub fn session_not_found(id: &str) -> Self {
        CoreError::SessionNotFound(id.to_string()).into()
    }

    pub fn status(&self) -> StatusCode {
        match self.code {
            ErrorCode::AccessDenied
            | ErrorCode::LocationNotAccessible
            | ErrorCode::FunctionNotAllowed
            | ErrorCode::ApprovalRequired
            | ErrorCode::NotSessionOwner => StatusCode::FORBIDDEN,

            ErrorCode::DayNotOpen
            | ErrorCode::DayAlreadyOpen
            | ErrorCode::DayHasOpenSessions
            | ErrorCode::DayHasUnsettledSessions
            | ErrorCode::SessionWrongState
            | ErrorCode::TerminalBusy
            | ErrorCode::SettlementBlockedSuspendedBills
            | ErrorCode::SettlementBlockedPartialTxn
            | ErrorCode::SettlementBlockedPending
            | ErrorCode::Conflict => StatusCode::CONFLICT,

            ErrorCode::VarianceReasonRequired
            | ErrorCode::VarianceReasonInvalid
            | ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            ErrorCode::SessionNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        ApiError {
            code: error.code(),
            approver_roles: error.approver_roles().map(<[Role]>::to_vec),
            message: error.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        CoreError::from(error).into()
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        let code = error.code();
        if code == ErrorCode::Internal {
            tracing::error!(error = %error, "Database failure");
            return ApiError::internal("internal database error");
        }
        ApiError::new(code, error.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        DbError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && self.code != ErrorCode::Busy {
            tracing::error!(code = %self.code, message = %self.message, "Request failed");
        } else {
            tracing::debug!(code = %self.code, message = %self.message, "Request rejected");
        }
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_required_carries_roles() {
        let err: ApiError = CoreError::ApprovalRequired {
            function: "F11".into(),
            approver_roles: vec![Role::PosManager, Role::Admin],
        }
        .into();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "APPROVAL_REQUIRED");
        assert_eq!(json["approver_roles"], serde_json::json!(["posmanager", "admin"]));
    }

    #[test]
    fn test_roles_omitted_when_absent() {
        let err: ApiError = CoreError::TerminalBusy {
            terminal_id: "t1".into(),
        }
        .into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "TERMINAL_BUSY");
        assert!(json.get("approver_roles").is_none());
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_db_errors_keep_retryable_codes() {
        let busy: ApiError = DbError::Busy("database is locked".into()).into();
        assert_eq!(busy.code, ErrorCode::Busy);
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let conflict: ApiError = DbError::duplicate("terminal_id", "t1").into();
        assert_eq!(conflict.code, ErrorCode::Conflict);

        let internal: ApiError = DbError::QueryFailed("syntax error near SELECT".into()).into();
        assert_eq!(internal.code, ErrorCode::Internal);
        assert!(!internal.message.contains("SELECT"));
    }
}
