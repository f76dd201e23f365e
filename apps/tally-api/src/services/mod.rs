//! Service layer.
//!
//! Each service owns one area of the API. Handlers stay thin: they parse the
//! request, call a service and wrap the result in JSON.
//!
//! Transitions follow one shape:
//!
//! ```text
//! verify approver (pool) ─► lock keys ─► begin tx ─► load ─► core plan_* ─► persist + audit ─► commit
//! ```
//!
//! The approver is verified before the transaction begins; nothing inside a
//! transaction touches the pool directly.

pub mod access_service;
pub mod auth_service;
pub mod day_service;
pub mod function_service;
pub mod health_service;
pub mod session_service;
pub mod settings_service;

use sqlx::SqliteConnection;

use tally_core::access;
use tally_core::{CoreError, Location, Operation, User};
use tally_db::Database;

use crate::error::{ApiError, ApiResult};

/// Loads `location_id` and runs the access policy for `user` against it.
pub(crate) async fn require_location_access(
    db: &Database,
    conn: &mut SqliteConnection,
    user: &User,
    operation: Operation,
    location_id: &str,
) -> ApiResult<Location> {
    let location = db
        .org()
        .find_location(conn, location_id)
        .await?
        .ok_or_else(|| ApiError::not_found("location", location_id))?;

    let mapped = db.org().mapped_locations(conn, &user.id).await?;
    let verdict = access::check(user, &mapped, operation, Some(&location));
    if !verdict.is_allowed() {
        tracing::warn!(
            user_id = %user.id,
            location_id = %location.id,
            ?operation,
            "Access denied"
        );
    }
    verdict.into_result(Some(&location.id))?;
    Ok(location)
}

/// Read access to a location: POS or back-office access is enough.
pub(crate) async fn require_location_read(
    db: &Database,
    conn: &mut SqliteConnection,
    user: &User,
    location_id: &str,
) -> ApiResult<Location> {
    let location = db
        .org()
        .find_location(conn, location_id)
        .await?
        .ok_or_else(|| ApiError::not_found("location", location_id))?;

    let mapped = db.org().mapped_locations(conn, &user.id).await?;
    let pos = access::check(user, &mapped, Operation::Pos, Some(&location));
    if pos.is_allowed() {
        return Ok(location);
    }
    let back_office = access::check(user, &mapped, Operation::BackOffice, Some(&location));
    if back_office.is_allowed() {
        return Ok(location);
    }

    // report the denial for the kind of work the role does
    let verdict = if user.role.access_mode().covers(Operation::Pos) {
        pos
    } else {
        back_office
    };
    verdict.into_result(Some(&location.id))?;
    Ok(location)
}

/// Admin-only endpoints.
pub(crate) fn require_admin(user: &User, action: &str) -> ApiResult<()> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(CoreError::AccessDenied {
            reason: format!("only an admin may {}", action),
        }
        .into())
    }
}
