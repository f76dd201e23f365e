//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Minor Units?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ a drawer never balances         │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units inside, decimals at the edge         │
//! │                                                                         │
//! │    API "125.50" ──► Money::from_decimal(…, 2) ──► 12550                 │
//! │    cash book, variance, tolerance all work on i64                       │
//! │    12550 ──► Money::to_decimal(2) ──► "125.50" in the response          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The currency scale (number of decimal places) is configuration, not a
//! constant, so conversions always take it as a parameter.
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use tally_core::money::Money;
//!
//! let float = Money::from_decimal(Decimal::new(10000, 2), 2).unwrap(); // 100.00
//! let drop = Money::from_minor(8000);
//! assert_eq!((float - drop).minor(), 2000);
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::error::ValidationError;

/// Decimal places used when no scale is configured.
pub const DEFAULT_SCALE: u32 = 2;

/// Largest scale accepted by configuration.
pub const MAX_SCALE: u32 = 6;

/// Largest magnitude, in minor units, accepted from the outside.
///
/// Leaves enough headroom that summing a session's cash book cannot overflow
/// `i64`.
pub const MAX_AMOUNT_MINOR: i64 = 10_000_000_000_000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Signed: cash book entries carry negative amounts for money leaving the
/// drawer, and variance is negative for a shortage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let short = Money::from_minor(-150); // -1.50 at scale 2
    /// assert!(short.is_negative());
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Converts a decimal amount into minor units at `scale` decimal places.
    ///
    /// Rejects amounts with more fractional digits than `scale` rather than
    /// rounding them, so `10.005` at scale 2 is an error, not `10.01`.
    ///
    /// ## Example
    /// ```rust
    /// use rust_decimal::Decimal;
    /// use tally_core::money::Money;
    ///
    /// let m = Money::from_decimal(Decimal::new(12550, 2), 2).unwrap();
    /// assert_eq!(m.minor(), 12550);
    ///
    /// assert!(Money::from_decimal(Decimal::new(10005, 3), 2).is_err());
    /// ```
    pub fn from_decimal(value: Decimal, scale: u32) -> Result<Self, ValidationError> {
        Self::parse_field("amount", value, scale)
    }

    /// Same as [`Money::from_decimal`] but names the offending field in errors.
    pub fn parse_field(field: &str, value: Decimal, scale: u32) -> Result<Self, ValidationError> {
        if value.normalize().scale() > scale {
            return Err(ValidationError::TooPrecise {
                field: field.to_string(),
                scale,
            });
        }

        let mut scaled = value;
        scaled.rescale(scale);
        if scaled.scale() != scale {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
            });
        }

        i64::try_from(scaled.mantissa())
            .ok()
            .filter(|minor| minor.unsigned_abs() <= MAX_AMOUNT_MINOR.unsigned_abs())
            .map(Money)
            .ok_or_else(|| ValidationError::OutOfRange {
                field: field.to_string(),
            })
    }

    /// Converts minor units back into a decimal with `scale` decimal places.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// assert_eq!(Money::from_minor(-150).to_decimal(2).to_string(), "-1.50");
    /// ```
    pub fn to_decimal(&self, scale: u32) -> Decimal {
        Decimal::new(self.0, scale)
    }

    /// Checked addition, `None` on overflow.
    #[inline]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for Money {
    /// Formats at [`DEFAULT_SCALE`]; used for logs and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal(DEFAULT_SCALE))
    }
}

// =============================================================================
// Arithmetic Operations
// =============================================================================

impl Add for Money {
    type Output = Money;

    #[inline]
    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    #[inline]
    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Money;

    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Conversion Traits
// =============================================================================

impl From<i64> for Money {
    fn from(minor: i64) -> Self {
        Money(minor)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> Self {
        money.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_from_decimal_exact_scale() {
        assert_eq!(Money::from_decimal(dec("125.50"), 2).unwrap().minor(), 12550);
        assert_eq!(Money::from_decimal(dec("100"), 2).unwrap().minor(), 10000);
        assert_eq!(Money::from_decimal(dec("-1.5"), 2).unwrap().minor(), -150);
    }

    #[test]
    fn test_from_decimal_trailing_zeros_are_not_precision() {
        // 1.500 normalizes to 1.5, which fits scale 2
        assert_eq!(Money::from_decimal(dec("1.500"), 2).unwrap().minor(), 150);
    }

    #[test]
    fn test_from_decimal_rejects_excess_precision() {
        let err = Money::parse_field("counted_cash", dec("10.005"), 2).unwrap_err();
        assert!(matches!(err, ValidationError::TooPrecise { scale: 2, .. }));
    }

    #[test]
    fn test_from_decimal_rejects_huge_amounts() {
        let err = Money::parse_field("cash", dec("92233720368547758.07"), 2).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));

        let limit = Money::from_minor(MAX_AMOUNT_MINOR).to_decimal(2);
        assert_eq!(Money::from_decimal(limit, 2).unwrap().minor(), MAX_AMOUNT_MINOR);
        assert!(Money::from_decimal(-limit, 2).is_ok());
        assert!(Money::from_decimal(limit + dec("0.01"), 2).is_err());
    }

    #[test]
    fn test_other_scales() {
        assert_eq!(Money::from_decimal(dec("12.345"), 3).unwrap().minor(), 12345);
        assert_eq!(Money::from_decimal(dec("500"), 0).unwrap().minor(), 500);
        assert!(Money::from_decimal(dec("500.5"), 0).is_err());
    }

    #[test]
    fn test_to_decimal() {
        assert_eq!(Money::from_minor(12550).to_decimal(2), dec("125.50"));
        assert_eq!(Money::from_minor(-150).to_decimal(2).to_string(), "-1.50");
        assert_eq!(Money::from_minor(0).to_decimal(2).to_string(), "0.00");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let entries = [
            Money::from_minor(10000),
            Money::from_minor(5000),
            Money::from_minor(-8000),
        ];
        let total: Money = entries.iter().copied().sum();
        assert_eq!(total.minor(), 7000);
        assert_eq!((-total).minor(), -7000);
        assert_eq!(Money::from_minor(-150).abs().minor(), 150);
    }

    #[test]
    fn test_checked_add_overflow() {
        assert!(Money::from_minor(i64::MAX)
            .checked_add(Money::from_minor(1))
            .is_none());
    }

    #[test]
    fn test_display_uses_default_scale() {
        assert_eq!(Money::from_minor(2000).to_string(), "20.00");
    }
}
