//! # Access Policy
//!
//! Decides whether a user may perform an operation at a location, and which
//! locations a user may select after login.
//!
//! ## Decision Order
//! ```text
//! check(user, operation, location?)
//!   │
//!   ├─ role == admin ─────────────────────────────────► Allow
//!   ├─ user inactive ─────────────────────────────────► ACCESS_DENIED
//!   ├─ role's mode can't do `operation` ──────────────► ACCESS_DENIED
//!   │
//!   ├─ location given?
//!   │    ├─ type not reachable by role ───────────────► LOCATION_NOT_ACCESSIBLE
//!   │    ├─ no active mapping / location inactive ────► LOCATION_NOT_ACCESSIBLE
//!   │    ├─ mapping.access_type doesn't cover op ─────► ACCESS_DENIED
//!   │    └─────────────────────────────────────────────► Allow
//!   │
//!   └─ no location: allowed set non-empty ─────────────► Allow
//!                   otherwise ─────────────────────────► ACCESS_DENIED
//! ```

use serde::Serialize;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ErrorCode, ValidationError};
use crate::types::{AccessType, Location, MappedLocation, Operation, Role, User, UserLocationMapping};

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessVerdict {
    Allow,
    Deny { code: ErrorCode, reason: String },
}

impl AccessVerdict {
    fn deny(code: ErrorCode, reason: impl Into<String>) -> Self {
        AccessVerdict::Deny {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessVerdict::Allow)
    }

    /// Turns a denial into the matching `CoreError`.
    pub fn into_result(self, location_id: Option<&str>) -> CoreResult<()> {
        match self {
            AccessVerdict::Allow => Ok(()),
            AccessVerdict::Deny {
                code: ErrorCode::LocationNotAccessible,
                ..
            } => Err(CoreError::LocationNotAccessible {
                location_id: location_id.unwrap_or_default().to_string(),
            }),
            AccessVerdict::Deny { reason, .. } => Err(CoreError::AccessDenied { reason }),
        }
    }
}

/// Evaluates the access policy.
///
/// `mapped` holds the user's mappings joined with their locations; inactive
/// mappings may be included and are ignored.
pub fn check(
    user: &User,
    mapped: &[MappedLocation],
    operation: Operation,
    location: Option<&Location>,
) -> AccessVerdict {
    if user.role.is_admin() {
        return AccessVerdict::Allow;
    }
    if !user.is_active {
        return AccessVerdict::deny(ErrorCode::AccessDenied, "user is inactive");
    }
    if !user.role.access_mode().covers(operation) {
        return AccessVerdict::deny(
            ErrorCode::AccessDenied,
            format!("role {} cannot perform {:?} operations", user.role, operation),
        );
    }

    let Some(location) = location else {
        return if usable_mappings(user.role, mapped).next().is_some() {
            AccessVerdict::Allow
        } else {
            AccessVerdict::deny(ErrorCode::AccessDenied, "no accessible locations")
        };
    };

    if !user.role.reachable_location_types().contains(&location.location_type) {
        return AccessVerdict::deny(
            ErrorCode::LocationNotAccessible,
            format!("role {} cannot reach {:?} locations", user.role, location.location_type),
        );
    }

    let mapping = usable_mappings(user.role, mapped).find(|m| m.location.id == location.id);
    let Some(mapping) = mapping else {
        return AccessVerdict::deny(
            ErrorCode::LocationNotAccessible,
            format!("no active mapping to location {}", location.code),
        );
    };

    if !mapping.mapping.access_type.covers(operation) {
        return AccessVerdict::deny(
            ErrorCode::AccessDenied,
            format!(
                "mapping to {} grants {:?} access only",
                location.code, mapping.mapping.access_type
            ),
        );
    }

    AccessVerdict::Allow
}

/// Active mappings to active, reachable locations.
fn usable_mappings(role: Role, mapped: &[MappedLocation]) -> impl Iterator<Item = &MappedLocation> {
    let reachable = role.reachable_location_types();
    mapped.iter().filter(move |m| {
        m.mapping.is_active
            && m.location.is_active
            && reachable.contains(&m.location.location_type)
    })
}

// =============================================================================
// Location Selection
// =============================================================================

/// What the login screen offers the user.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct LocationSelection {
    pub locations: Vec<Location>,
    pub default_location_id: Option<String>,
    /// `false` while the user holds an active session.
    pub can_switch: bool,
}

/// Locations the user may pick for `operation`.
///
/// Admins see every active location; everyone else sees the active locations
/// their mappings grant for this kind of operation.
pub fn accessible_locations(
    user: &User,
    mapped: &[MappedLocation],
    all_locations: &[Location],
    operation: Operation,
    has_active_session: bool,
) -> LocationSelection {
    if user.role.is_admin() {
        return LocationSelection {
            locations: all_locations.iter().filter(|l| l.is_active).cloned().collect(),
            default_location_id: None,
            can_switch: !has_active_session,
        };
    }

    if !user.is_active || !user.role.access_mode().covers(operation) {
        return LocationSelection {
            locations: Vec::new(),
            default_location_id: None,
            can_switch: false,
        };
    }

    let usable: Vec<&MappedLocation> = usable_mappings(user.role, mapped)
        .filter(|m| m.mapping.access_type.covers(operation))
        .collect();

    let default_location_id = usable
        .iter()
        .find(|m| m.mapping.is_default)
        .map(|m| m.location.id.clone());

    LocationSelection {
        locations: usable.into_iter().map(|m| m.location.clone()).collect(),
        default_location_id,
        can_switch: !has_active_session,
    }
}

// =============================================================================
// Mapping Invariants
// =============================================================================

/// Validates a user's full set of mappings before one is added or changed.
///
/// - at most one active default per access type
/// - a posuser has at most one active mapping granting POS access
pub fn validate_mappings(role: Role, mappings: &[UserLocationMapping]) -> Result<(), ValidationError> {
    let active: Vec<&UserLocationMapping> = mappings.iter().filter(|m| m.is_active).collect();

    for access_type in [AccessType::Pos, AccessType::BackOffice, AccessType::Both] {
        let defaults = active
            .iter()
            .filter(|m| m.is_default && m.access_type == access_type)
            .count();
        if defaults > 1 {
            return Err(ValidationError::NotAllowed {
                field: "is_default".to_string(),
                reason: format!("more than one default {:?} mapping", access_type),
            });
        }
    }

    if role == Role::PosUser {
        let pos_mappings = active
            .iter()
            .filter(|m| m.access_type.covers(Operation::Pos))
            .count();
        if pos_mappings > 1 {
            return Err(ValidationError::NotAllowed {
                field: "location_id".to_string(),
                reason: "a posuser may be mapped to only one POS location".to_string(),
            });
        }
    }

    Ok(())
}
