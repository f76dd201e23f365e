//! Shared fixture: an in-memory database with one small organisation.
//!
//! ```text
//! Tally Test Retail
//! ├── HQ    headquarters
//! ├── S-A   store      tills A1, A2
//! ├── S-B   store      till B1
//! └── W01   warehouse
//!
//! admin     admin
//! manager   posmanager        S-A (both, default)
//! manager_b posmanager        S-B (both, default)
//! cashier   posuser           S-A (pos)
//! cashier2  posuser           S-A (pos)
//! clerk     backofficeuser    S-A (back_office), W01 (back_office)
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use tally_api::auth::ApproverCredentials;
use tally_api::dto::{
    CommitCloseRequest, OpenDayRequest, OpenSessionRequest, RecordSaleRequest,
    SessionActionRequest, SessionView,
};
use tally_api::services::day_service::DayService;
use tally_api::services::session_service::SessionService;
use tally_api::{ApiResult, AppState, ServerConfig};
use tally_core::{
    AccessType, Company, DayOpen, ErrorCode, Location, LocationType, Role, SaleStatus, Terminal,
    User, UserLocationMapping,
};
use tally_db::seed::{hash_password, seed_reference_data};
use tally_db::{Database, DbConfig};

pub const PASSWORD: &str = "secret123";

pub fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

/// The error code of a call expected to fail.
pub fn code<T: std::fmt::Debug>(result: ApiResult<T>) -> ErrorCode {
    result.unwrap_err().code
}

pub struct Fixture {
    pub state: Arc<AppState>,
    pub store_a: Location,
    pub store_b: Location,
    pub warehouse: Location,
    pub hq: Location,
    pub till_a1: Terminal,
    pub till_a2: Terminal,
    pub till_b1: Terminal,
    pub admin: User,
    pub manager: User,
    pub manager_b: User,
    pub cashier: User,
    pub cashier2: User,
    pub clerk: User,
}

fn location(code: &str, location_type: LocationType) -> Location {
    Location {
        id: uuid::Uuid::new_v4().to_string(),
        company_id: "company-1".to_string(),
        code: code.to_string(),
        name: code.to_string(),
        location_type,
        is_active: true,
    }
}

fn terminal(location: &Location, code: &str) -> Terminal {
    Terminal {
        id: uuid::Uuid::new_v4().to_string(),
        location_id: location.id.clone(),
        code: code.to_string(),
        name: format!("Till {}", code),
        is_active: true,
    }
}

fn user(username: &str, role: Role) -> User {
    User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        display_name: username.to_string(),
        role,
        is_active: true,
    }
}

fn mapping(user: &User, location: &Location, access_type: AccessType, is_default: bool) -> UserLocationMapping {
    UserLocationMapping {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        location_id: location.id.clone(),
        access_type,
        is_default,
        is_active: true,
    }
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed_reference_data(&db).await.unwrap();

        let hq = location("HQ", LocationType::Headquarters);
        let store_a = location("S-A", LocationType::Store);
        let store_b = location("S-B", LocationType::Store);
        let warehouse = location("W01", LocationType::Warehouse);
        let till_a1 = terminal(&store_a, "A1");
        let till_a2 = terminal(&store_a, "A2");
        let till_b1 = terminal(&store_b, "B1");

        let admin = user("admin", Role::Admin);
        let manager = user("manager", Role::PosManager);
        let manager_b = user("manager_b", Role::PosManager);
        let cashier = user("cashier", Role::PosUser);
        let cashier2 = user("cashier2", Role::PosUser);
        let clerk = user("clerk", Role::BackOfficeUser);

        // one hash for everyone keeps argon2 out of the hot path
        let hash = hash_password(PASSWORD).unwrap();

        let mut tx = db.begin().await.unwrap();
        let org = db.org();
        org.insert_company(
            &mut tx,
            &Company {
                id: "company-1".to_string(),
                name: "Tally Test Retail".to_string(),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        for loc in [&hq, &store_a, &store_b, &warehouse] {
            org.insert_location(&mut tx, loc).await.unwrap();
        }
        for till in [&till_a1, &till_a2, &till_b1] {
            org.insert_terminal(&mut tx, till).await.unwrap();
        }
        for u in [&admin, &manager, &manager_b, &cashier, &cashier2, &clerk] {
            org.insert_user(&mut tx, u, &hash).await.unwrap();
        }
        for m in [
            mapping(&manager, &store_a, AccessType::Both, true),
            mapping(&manager_b, &store_b, AccessType::Both, true),
            mapping(&cashier, &store_a, AccessType::Pos, true),
            mapping(&cashier2, &store_a, AccessType::Pos, true),
            mapping(&clerk, &store_a, AccessType::BackOffice, false),
            mapping(&clerk, &warehouse, AccessType::BackOffice, true),
        ] {
            org.insert_mapping(&mut tx, &m).await.unwrap();
        }
        tx.commit().await.unwrap();

        let state = Arc::new(AppState::new(db, config).unwrap());

        Fixture {
            state,
            store_a,
            store_b,
            warehouse,
            hq,
            till_a1,
            till_a2,
            till_b1,
            admin,
            manager,
            manager_b,
            cashier,
            cashier2,
            clerk,
        }
    }

    pub fn days(&self) -> DayService {
        DayService::new(self.state.clone())
    }

    pub fn sessions(&self) -> SessionService {
        SessionService::new(self.state.clone())
    }

    pub fn approver(&self, user: &User) -> Option<ApproverCredentials> {
        Some(ApproverCredentials {
            username: user.username.clone(),
            password: PASSWORD.to_string(),
        })
    }

    /// Opens the business day at store A as the admin.
    pub async fn open_day(&self) -> DayOpen {
        self.days()
            .open(
                self.admin.clone(),
                OpenDayRequest {
                    location_id: self.store_a.id.clone(),
                    business_date: NaiveDate::from_ymd_opt(2024, 1, 10),
                },
            )
            .await
            .unwrap()
    }

    pub async fn open_session(&self, cashier: &User, till: &Terminal, float: &str) -> SessionView {
        self.sessions()
            .open(
                cashier.clone(),
                OpenSessionRequest {
                    terminal_id: till.id.clone(),
                    opening_float: dec(float),
                },
            )
            .await
            .unwrap()
    }

    /// Records a completed cash sale as the session's cashier.
    pub async fn cash_sale(&self, cashier: &User, session_id: &str, cash: &str) {
        self.sessions()
            .record_sale(cashier.clone(), sale(session_id, SaleStatus::Completed, cash))
            .await
            .unwrap();
    }

    pub async fn begin_close(&self, cashier: &User, session_id: &str) -> SessionView {
        self.sessions()
            .begin_close(cashier.clone(), action(session_id))
            .await
            .unwrap()
    }
}

pub fn sale(session_id: &str, status: SaleStatus, cash: &str) -> RecordSaleRequest {
    RecordSaleRequest {
        session_id: session_id.to_string(),
        sale_id: None,
        status,
        cash: dec(cash),
        non_cash: Decimal::ZERO,
        refund: Decimal::ZERO,
        reference: None,
        approver: None,
    }
}

pub fn action(session_id: &str) -> SessionActionRequest {
    SessionActionRequest {
        session_id: session_id.to_string(),
        approver: None,
    }
}

pub fn commit(session_id: &str, counted: &str, reason: Option<&str>) -> CommitCloseRequest {
    CommitCloseRequest {
        session_id: session_id.to_string(),
        counted_cash: dec(counted),
        reason_code: reason.map(str::to_string),
        approver: None,
    }
}
