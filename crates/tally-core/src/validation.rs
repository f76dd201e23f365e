//! # Validation Module
//!
//! Input validation utilities for Tally POS.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP extraction (serde)                                      │
//! │  ├── Unknown enum values (role, function code) rejected                │
//! │  └── Decimal parsing                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Amount scale / sign                                               │
//! │  └── Identifiers, codes, notes                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Engines (session, day, access)                               │
//! │  └── State and business-rule guards                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite                                                       │
//! │  └── CHECK, UNIQUE, partial indexes, append-only triggers              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use tally_core::validation::{parse_amount, validate_code};
//!
//! validate_code("reason", "SHORT").unwrap();
//! let float = parse_amount("opening_float", Decimal::new(10000, 2), 2).unwrap();
//! assert_eq!(float.minor(), 10000);
//! ```

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::money::{Money, MAX_SCALE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest free-text note accepted on drops and cash movements.
pub const MAX_NOTE_LEN: usize = 500;

// =============================================================================
// Amount Validators
// =============================================================================

/// Parses a non-negative decimal amount at `scale`.
///
/// ## Example
/// ```rust
/// use rust_decimal::Decimal;
/// use tally_core::validation::parse_amount;
///
/// assert!(parse_amount("counted_cash", Decimal::new(14850, 2), 2).is_ok());
/// assert!(parse_amount("counted_cash", Decimal::new(-1, 0), 2).is_err());
/// assert!(parse_amount("counted_cash", Decimal::new(1, 3), 2).is_err());
/// ```
pub fn parse_amount(field: &str, value: Decimal, scale: u32) -> ValidationResult<Money> {
    let money = Money::parse_field(field, value, scale)?;
    if money.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(money)
}

/// Like [`parse_amount`] but also rejects zero.
pub fn parse_positive_amount(field: &str, value: Decimal, scale: u32) -> ValidationResult<Money> {
    let money = parse_amount(field, value, scale)?;
    if money.is_zero() {
        return Err(ValidationError::NotAllowed {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(money)
}

/// Validates a configured currency scale.
pub fn validate_scale(scale: u32) -> ValidationResult<()> {
    if scale > MAX_SCALE {
        return Err(ValidationError::NotAllowed {
            field: "decimal_scale".to_string(),
            reason: format!("must be at most {}", MAX_SCALE),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a short business code (location, terminal, reason).
///
/// ## Rules
/// - Not empty, at most 32 characters
/// - Letters, digits, hyphens and underscores only
pub fn validate_code(field: &str, code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if code.len() > 32 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 32,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a login name.
pub fn validate_username(username: &str) -> ValidationResult<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::Required {
            field: "username".to_string(),
        });
    }
    if username.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "username".to_string(),
            max: 64,
        });
    }
    Ok(())
}

/// Trims an optional note, turning blank input into `None`.
pub fn normalize_note(note: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(ValidationError::TooLong {
            field: "note".to_string(),
            max: MAX_NOTE_LEN,
        });
    }
    Ok(Some(note.to_string()))
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_uuid;
///
/// assert!(validate_uuid("session_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("session_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_amount() {
        let d = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(parse_amount("x", d("148.50"), 2).unwrap().minor(), 14850);
        assert_eq!(parse_amount("x", d("0"), 2).unwrap(), Money::zero());
        assert!(matches!(
            parse_amount("x", d("-0.01"), 2),
            Err(ValidationError::MustNotBeNegative { .. })
        ));
        assert!(matches!(
            parse_amount("x", d("1.001"), 2),
            Err(ValidationError::TooPrecise { .. })
        ));
        assert!(parse_positive_amount("x", d("0.00"), 2).is_err());
        assert!(parse_positive_amount("x", d("0.01"), 2).is_ok());
    }

    #[test]
    fn test_validate_code() {
        assert!(validate_code("code", "SHORT").is_ok());
        assert!(validate_code("code", "T-01").is_ok());
        assert!(validate_code("code", "").is_err());
        assert!(validate_code("code", "has space").is_err());
        assert!(validate_code("code", &"A".repeat(40)).is_err());
    }

    #[test]
    fn test_normalize_note() {
        assert_eq!(normalize_note(None).unwrap(), None);
        assert_eq!(normalize_note(Some("   ")).unwrap(), None);
        assert_eq!(
            normalize_note(Some(" drop ")).unwrap().as_deref(),
            Some("drop")
        );
        assert!(normalize_note(Some(&"x".repeat(MAX_NOTE_LEN + 1))).is_err());
    }

    #[test]
    fn test_validate_scale() {
        assert!(validate_scale(2).is_ok());
        assert!(validate_scale(0).is_ok());
        assert!(validate_scale(MAX_SCALE + 1).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("id", &uuid::Uuid::new_v4().to_string()).is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("cashier1").is_ok());
        assert!(validate_username(" ").is_err());
    }
}
