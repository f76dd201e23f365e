//! # tally-core: Pure Business Rules for Tally POS
//!
//! This crate holds every rule of the session and cash-handling core as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Terminals / Back-office (HTTP + JSON)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          tally-api: locks, transactions, services               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   access      functions     cash_book     settlement            │   │
//! │  │   session     day           money         validation            │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Location, User, Session, DayOpen, ...)
//! - [`money`] - Money in integer minor units, decimal conversion at the edge
//! - [`error`] - Error codes and domain error types
//! - [`access`] - Role × location access policy
//! - [`functions`] - POS function registry and role matrix
//! - [`cash_book`] - Append-only per-session cash ledger
//! - [`session`] - Session state machine and transition planning
//! - [`day`] - Business day guards
//! - [`settlement`] - Settlement preconditions
//! - [`validation`] - Input validation
//!
//! ## Design Principles
//!
//! 1. **Plan, then persist**: transitions return the rows to write; callers
//!    persist them atomically or not at all
//! 2. **No I/O**: database, locks and clocks are the caller's business
//! 3. **Integer Money**: amounts are i64 minor units
//! 4. **Explicit Errors**: every rejection carries a stable [`ErrorCode`]
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::functions::{FunctionCode, FunctionMatrix, FunctionVerdict};
//! use tally_core::Role;
//!
//! let matrix = FunctionMatrix::seeded();
//! let verdict = matrix.authorize(Role::PosUser, FunctionCode::F11, None);
//! assert_eq!(
//!     verdict,
//!     FunctionVerdict::RequireApproval { approver_roles: vec![Role::PosManager, Role::Admin] }
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod cash_book;
pub mod day;
pub mod error;
pub mod functions;
pub mod money;
pub mod session;
pub mod settlement;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorCode, ValidationError};
pub use money::Money;
pub use types::*;
