//! # Tally API
//!
//! HTTP/JSON server for the POS session and cash-handling core.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Tally API                                    │
//! │                                                                         │
//! │  Terminal / Back office                                                 │
//! │        │ HTTP + Bearer JWT                                              │
//! │        ▼                                                                │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌─────────────────────────┐ │
//! │  │ api (axum)   │──►│ services         │──►│ tally-core (rules)      │ │
//! │  │ CurrentUser  │   │ LockRegistry     │   └─────────────────────────┘ │
//! │  └──────────────┘   │ one tx per call  │──►┌─────────────────────────┐ │
//! │                     └──────────────────┘   │ tally-db (SQLite)       │ │
//! │                                            └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! See [`config`]. Environment variables override `tally.toml`:
//! - `TALLY_BIND_ADDR` - listen address (default: 0.0.0.0:8080)
//! - `DATABASE_PATH` - SQLite file (default: ./tally.db)
//! - `JWT_SECRET` - secret for JWT signing
//! - `TALLY_LOCK_TIMEOUT_MS` - lock and database deadline (default: 5000)

pub mod api;
pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod locks;
pub mod services;
pub mod state;

// Re-exports
pub use api::build_app;
pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use state::AppState;
