//! # Repository Module
//!
//! Database repository implementations for Tally POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Service (tally-api)                                                   │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin().await?;                               │
//! │       │  db.sessions().find(&mut tx, id)                               │
//! │       ▼                                                                 │
//! │  SessionRepository                                                     │
//! │  ├── find(&self, conn, id)                                             │
//! │  ├── append_entries(&self, conn, entries)                              │
//! │  └── commit_close(&self, conn, id, record)                             │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Methods that take `conn` run on whatever connection the caller        │
//! │  passes (a transaction for every state transition). Methods without    │
//! │  one read straight from the pool.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OrgRepository`] - Companies, locations, terminals, users, mappings
//! - [`FunctionRepository`] - POS function registry and role matrix
//! - [`SettingsRepository`] - Settlement settings and reasons
//! - [`DayRepository`] - Business days and their counters
//! - [`SessionRepository`] - Sessions, cash book, snapshots, sales projection
//! - [`AuditRepository`] - Append-only audit trail

pub mod audit;
pub mod day;
pub mod function;
pub mod org;
pub mod session;
pub mod settings;

pub use audit::AuditRepository;
pub use day::DayRepository;
pub use function::FunctionRepository;
pub use org::{OrgRepository, UserCredentials};
pub use session::{CloseRecord, SessionRepository};
pub use settings::SettingsRepository;
