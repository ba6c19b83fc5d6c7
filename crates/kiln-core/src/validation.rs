//! # Validation Module
//!
//! Input checks that run before any write.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Boundary payload (JSON)                                      │
//! │  ├── reject_legacy_quantity_keys()                                     │
//! │  └── RunRequest::parse()                                               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + units.rs                                       │
//! │  ├── names, amounts, cost ranges                                       │
//! │  └── decimal → base unit normalization                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints on enums                                        │
//! │  └── Triggers keeping batches/movements append-only                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Integer quantity keys from older payload shapes. Never accepted.
pub const LEGACY_QUANTITY_KEYS: &[&str] =
    &["qty", "qty_base", "quantity_int", "quantity", "output_qty"];

/// Longest accepted item or recipe name.
pub const MAX_NAME_LEN: usize = 200;

// =============================================================================
// String Validators
// =============================================================================

/// Validates and trims a display name.
///
/// ## Example
/// ```rust
/// use kiln_core::validation::validate_name;
///
/// assert_eq!(validate_name("name", "  Kraft paper ").unwrap(), "Kraft paper");
/// assert!(validate_name("name", "   ").is_err());
/// ```
pub fn validate_name(field: &str, name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::required(field));
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

/// Trims optional free text; blank becomes `None`.
pub fn clean_optional_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Base quantities handed straight to the ledger must be positive.
pub fn validate_positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Unit costs are zero or more cents.
pub fn validate_unit_cost_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::InvalidUnitCost {
            value: cents.to_string(),
        });
    }
    Ok(())
}

/// Prices are zero or more cents.
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not be negative".to_string(),
        });
    }
    Ok(())
}

/// Cash amounts are accepted with either sign but never zero. Returns the
/// magnitude.
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<i64> {
    if cents == 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    cents
        .checked_abs()
        .ok_or_else(|| ValidationError::invalid_format(field, "out of range"))
}

// =============================================================================
// Payload Validators
// =============================================================================

/// Rejects a payload object carrying any legacy integer quantity key.
///
/// ## Example
/// ```rust
/// use kiln_core::validation::reject_legacy_quantity_keys;
/// use serde_json::json;
///
/// let ok = json!({"quantity_decimal": "2", "uom": "ea"});
/// assert!(reject_legacy_quantity_keys(ok.as_object().unwrap()).is_ok());
///
/// let legacy = json!({"quantity_decimal": "2", "uom": "ea", "qty_base": 2000});
/// assert!(reject_legacy_quantity_keys(legacy.as_object().unwrap()).is_err());
/// ```
pub fn reject_legacy_quantity_keys(payload: &Map<String, Value>) -> ValidationResult<()> {
    let keys: Vec<String> = LEGACY_QUANTITY_KEYS
        .iter()
        .copied()
        .filter(|key| payload.contains_key(*key))
        .map(str::to_string)
        .collect();

    if keys.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::LegacyQuantityKeysForbidden { keys })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
