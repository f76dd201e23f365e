//! # Seed Data Generator
//!
//! Installs reference data and a small demo organisation so the API can be
//! exercised locally.
//!
//! ## Usage
//! ```bash
//! cargo run -p tally-db --bin seed -- --db ./tally_dev.db
//! ```
//!
//! ## Demo Logins
//! ```text
//! admin    / admin123     admin        (all locations)
//! manager  / manager123   posmanager   (Store 001, default)
//! cashier  / cashier123   posuser      (Store 001)
//! backoff  / backoff123   backofficeuser (Warehouse 01)
//! ```

use chrono::Utc;
use std::env;

use tally_core::{
    AccessType, Company, Location, LocationType, Role, Terminal, User, UserLocationMapping,
};
use tally_db::seed::{hash_password, seed_reference_data};
use tally_db::{Database, DbConfig};

const COMPANY_ID: &str = "00000000-0000-4000-8000-000000000001";

/// (id suffix, code, name, type)
const LOCATIONS: &[(&str, &str, &str, LocationType)] = &[
    ("101", "HQ", "Head Office", LocationType::Headquarters),
    ("102", "S001", "Store 001", LocationType::Store),
    ("103", "W01", "Warehouse 01", LocationType::Warehouse),
];

/// (username, password, display name, role, mapped location code, access)
const USERS: &[(&str, &str, &str, Role, Option<(&str, AccessType)>)] = &[
    ("admin", "admin123", "Administrator", Role::Admin, None),
    (
        "manager",
        "manager123",
        "Store Manager",
        Role::PosManager,
        Some(("S001", AccessType::Both)),
    ),
    (
        "cashier",
        "cashier123",
        "Cashier One",
        Role::PosUser,
        Some(("S001", AccessType::Pos)),
    ),
    (
        "backoff",
        "backoff123",
        "Stock Clerk",
        Role::BackOfficeUser,
        Some(("W01", AccessType::BackOffice)),
    ),
];

fn location_id(suffix: &str) -> String {
    format!("00000000-0000-4000-8000-000000000{}", suffix)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./tally_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Tally POS Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    seed_reference_data(&db).await?;
    println!("✓ POS functions, role matrix and variance reasons installed");

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM company")
        .fetch_one(db.pool())
        .await?;
    if existing > 0 {
        println!("⚠ Demo organisation already present, skipping.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut tx = db.begin().await?;
    let org = db.org();

    org.insert_company(
        &mut tx,
        &Company {
            id: COMPANY_ID.to_string(),
            name: "Tally Demo Retail".to_string(),
            created_at: Utc::now(),
        },
    )
    .await?;

    let mut locations = Vec::new();
    for (suffix, code, name, location_type) in LOCATIONS {
        let location = Location {
            id: location_id(suffix),
            company_id: COMPANY_ID.to_string(),
            code: code.to_string(),
            name: name.to_string(),
            location_type: *location_type,
            is_active: true,
        };
        org.insert_location(&mut tx, &location).await?;
        locations.push(location);
    }
    println!("✓ {} locations", locations.len());

    let store_id = location_id("102");
    for n in 1..=2 {
        org.insert_terminal(
            &mut tx,
            &Terminal {
                id: uuid::Uuid::new_v4().to_string(),
                location_id: store_id.clone(),
                code: format!("T{}", n),
                name: format!("Till {}", n),
                is_active: true,
            },
        )
        .await?;
    }
    println!("✓ 2 terminals at Store 001");

    for (username, password, display_name, role, mapping) in USERS {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: display_name.to_string(),
            role: *role,
            is_active: true,
        };
        org.insert_user(&mut tx, &user, &hash_password(password)?).await?;

        if let Some((code, access_type)) = mapping {
            let location = locations
                .iter()
                .find(|l| l.code == *code)
                .ok_or("demo mapping points at an unknown location")?;
            org.insert_mapping(
                &mut tx,
                &UserLocationMapping {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    location_id: location.id.clone(),
                    access_type: *access_type,
                    is_default: true,
                    is_active: true,
                },
            )
            .await?;
        }
        println!("  user {:<8} ({})", username, role);
    }

    tx.commit().await?;

    println!();
    println!("✓ Seed complete!");
    Ok(())
}
