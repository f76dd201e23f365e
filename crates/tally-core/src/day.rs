//! # Day Engine
//!
//! Guards for opening and closing a business day at a location.
//!
//! ```text
//! open_day(user, location, date)
//!   role ∈ {admin, posmanager}, no active day at location
//!
//! close_day(user, day)
//!   role ∈ {admin, posmanager}
//!   every session closed                      else DAY_HAS_OPEN_SESSIONS
//!   validator passes for each session         else SETTLEMENT_BLOCKED_*
//!   !allow_deferred ⇒ every session settled   else DAY_HAS_UNSETTLED_SESSIONS
//! ```

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::settlement::{self, SettlementInputs};
use crate::types::{DayOpen, Location, SalesAggregate, Session, SettlementSettings, User};

fn check_role(user: &User, action: &str) -> CoreResult<()> {
    if user.role.can_manage_day() {
        Ok(())
    } else {
        Err(CoreError::AccessDenied {
            reason: format!("role {} cannot {} a business day", user.role, action),
        })
    }
}

/// Validates and builds a new active day. Counters start at 1.
pub fn open(
    user: &User,
    location: &Location,
    existing_active: Option<&DayOpen>,
    business_date: NaiveDate,
    at: DateTime<Utc>,
) -> CoreResult<DayOpen> {
    check_role(user, "open")?;

    if existing_active.is_some_and(|d| d.is_active) {
        return Err(CoreError::DayAlreadyOpen {
            location_id: location.id.clone(),
        });
    }

    Ok(DayOpen {
        id: uuid::Uuid::new_v4().to_string(),
        location_id: location.id.clone(),
        business_date,
        opened_by: Some(user.id.clone()),
        opened_at: at,
        closed_by: None,
        closed_at: None,
        is_active: true,
        next_sale_number: 1,
        next_session_number: 1,
    })
}

/// A session of the day together with its sales figures.
#[derive(Debug, Clone)]
pub struct DaySession {
    pub session: Session,
    pub sales: SalesAggregate,
}

/// Checks every close precondition for `day`.
pub fn guard_close(
    user: &User,
    day: &DayOpen,
    sessions: &[DaySession],
    settings: &SettlementSettings,
    tolerance: Money,
) -> CoreResult<()> {
    check_role(user, "close")?;

    let open_sessions = sessions.iter().filter(|s| s.session.state.is_active()).count();
    if open_sessions > 0 {
        return Err(CoreError::DayHasOpenSessions {
            day_id: day.id.clone(),
            open_sessions,
        });
    }

    for entry in sessions {
        // drop acknowledgement only gates session close
        settlement::validate(
            settings,
            &SettlementInputs {
                sales: entry.sales,
                pending_drops: 0,
            },
        )?;
    }

    if !settings.allow_deferred_settlement {
        let unsettled = sessions
            .iter()
            .filter(|s| !s.session.is_settled(tolerance))
            .count();
        if unsettled > 0 {
            return Err(CoreError::DayHasUnsettledSessions {
                day_id: day.id.clone(),
                unsettled,
            });
        }
    }

    Ok(())
}
