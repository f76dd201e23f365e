//! # Cash Book
//!
//! Append-only ledger of cash movements for one session. Every expected-cash
//! figure in the system is derived from it.
//!
//! ## Entry Signs
//! ```text
//! ┌──────────────────┬──────┬───────────────────────────────────────────┐
//! │ kind             │ sign │ source                                    │
//! ├──────────────────┼──────┼───────────────────────────────────────────┤
//! │ opening_float    │  +   │ open_session                              │
//! │ sale_cash        │  +   │ record_sale (cash tendered)               │
//! │ pay_in           │  +   │ record_cash_movement                      │
//! │ refund_cash      │  −   │ record_sale (cash refunded)               │
//! │ pay_out          │  −   │ record_cash_movement                      │
//! │ interim_drop     │  −   │ interim_settle                            │
//! └──────────────────┴──────┴───────────────────────────────────────────┘
//!
//! expected_cash  = Σ all entries
//! base_expected  = Σ entries up to and including the last interim_drop
//! ```
//!
//! Entries are never edited. A new entry is staged against the current book
//! and only appended once it has been persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CashEntryKind {
    OpeningFloat,
    SaleCash,
    RefundCash,
    PayIn,
    PayOut,
    InterimDrop,
}

impl CashEntryKind {
    /// +1 for money entering the drawer, -1 for money leaving it.
    pub const fn sign(&self) -> i64 {
        match self {
            CashEntryKind::OpeningFloat | CashEntryKind::SaleCash | CashEntryKind::PayIn => 1,
            CashEntryKind::RefundCash | CashEntryKind::PayOut | CashEntryKind::InterimDrop => -1,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            CashEntryKind::OpeningFloat => "opening_float",
            CashEntryKind::SaleCash => "sale_cash",
            CashEntryKind::RefundCash => "refund_cash",
            CashEntryKind::PayIn => "pay_in",
            CashEntryKind::PayOut => "pay_out",
            CashEntryKind::InterimDrop => "interim_drop",
        }
    }
}

/// One signed movement in the cash book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashEntry {
    pub id: String,
    pub session_id: String,
    /// 1-based position in the book.
    pub seq: i64,
    pub kind: CashEntryKind,
    /// Signed amount in minor units.
    pub amount_minor: i64,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
}

impl CashEntry {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_minor(self.amount_minor)
    }
}

/// The cash book of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CashBook {
    session_id: String,
    entries: Vec<CashEntry>,
}

impl CashBook {
    pub fn new(session_id: impl Into<String>) -> Self {
        CashBook {
            session_id: session_id.into(),
            entries: Vec::new(),
        }
    }

    /// Rebuilds a book from stored entries, ordered by sequence.
    pub fn from_entries(session_id: impl Into<String>, mut entries: Vec<CashEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        CashBook {
            session_id: session_id.into(),
            entries,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn entries(&self) -> &[CashEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the next entry without touching the book.
    ///
    /// `magnitude` is the unsigned amount; the kind decides the sign. Only an
    /// opening float or an interim drop may be zero (a zero drop still marks
    /// the new baseline).
    pub fn stage(
        &self,
        kind: CashEntryKind,
        magnitude: Money,
        reference: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> CoreResult<CashEntry> {
        if magnitude.is_negative() {
            return Err(ValidationError::MustNotBeNegative {
                field: kind.as_str().to_string(),
            }
            .into());
        }
        if magnitude.is_zero()
            && !matches!(kind, CashEntryKind::OpeningFloat | CashEntryKind::InterimDrop)
        {
            return Err(ValidationError::NotAllowed {
                field: kind.as_str().to_string(),
                reason: "amount must be greater than zero".to_string(),
            }
            .into());
        }

        let next_seq = self.entries.last().map(|e| e.seq).unwrap_or(0) + 1;
        Ok(CashEntry {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            seq: next_seq,
            kind,
            amount_minor: magnitude.minor() * kind.sign(),
            reference,
            recorded_at,
        })
    }

    /// Appends a previously staged entry.
    pub fn append(&mut self, entry: CashEntry) {
        debug_assert_eq!(entry.session_id, self.session_id);
        self.entries.push(entry);
    }

    /// Book value of the drawer right now.
    pub fn expected_cash(&self) -> Money {
        self.entries.iter().map(CashEntry::amount).sum()
    }

    /// Book value as of `at`, ignoring later entries.
    pub fn expected_cash_at(&self, at: DateTime<Utc>) -> Money {
        self.entries
            .iter()
            .filter(|e| e.recorded_at <= at)
            .map(CashEntry::amount)
            .sum()
    }

    /// Sum of entries up to and including the most recent interim drop.
    ///
    /// Equals the opening float before any drop has been taken.
    pub fn base_expected_cash(&self) -> Money {
        match self.last_drop_position() {
            Some(pos) => self.entries[..=pos].iter().map(CashEntry::amount).sum(),
            None => self
                .entries
                .iter()
                .filter(|e| e.kind == CashEntryKind::OpeningFloat)
                .map(CashEntry::amount)
                .sum(),
        }
    }

    /// Net movement on top of the baseline.
    pub fn since_last_drop(&self) -> Money {
        self.expected_cash() - self.base_expected_cash()
    }

    /// Total of a single entry kind (signed).
    pub fn total_of(&self, kind: CashEntryKind) -> Money {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(CashEntry::amount)
            .sum()
    }

    /// `counted - expected`; negative means the drawer is short.
    pub fn variance(&self, counted: Money) -> Money {
        counted - self.expected_cash()
    }

    fn last_drop_position(&self) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|e| e.kind == CashEntryKind::InterimDrop)
    }
}
