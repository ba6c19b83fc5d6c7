//! # Unit Normalization
//!
//! Converts human quantities ("1.25 kg") and human costs ("4.00 per kg")
//! into the two integer spaces the ledger works in: **base units** and
//! **cents**.
//!
//! ## Where This Sits
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Quantity Data Flow                                 │
//! │                                                                         │
//! │  Caller: { dimension: weight, uom: "kg", quantity_decimal: "1.25" }    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  to_base_units()  ← THE ONLY PLACE DECIMALS ARE PARSED                 │
//! │       │            1.25 × 1_000_000 = 1_250_000 (must be whole)        │
//! │       ▼                                                                 │
//! │  Ledger / Manufacturing / Finance (i64 only)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  format_base_qty() → "1.25" for reports                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Unit Tables
//! | Dimension | Units (base units per 1)                       | Default |
//! |-----------|-------------------------------------------------|---------|
//! | count     | ea=1000, mc=1                                   | ea      |
//! | weight    | kg=1_000_000, g=1000, mg=1                      | g       |
//! | length    | m=1000, cm=10, mm=1                             | m       |
//! | area      | m2=1_000_000, cm2=100, mm2=1                    | m2      |
//! | volume    | l=1_000_000, ml=1000                            | l       |
//!
//! A fractional base quantity is a hard error, never a truncation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::validation::ValidationResult;

// =============================================================================
// Dimension
// =============================================================================

/// A measurement category. Defines which units are valid for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    /// Discrete things. Base unit is a thousandth of an each.
    Count,
    /// Base unit is the milligram.
    Weight,
    /// Base unit is the millimetre.
    Length,
    /// Base unit is the square millimetre.
    Area,
    /// Base unit is the microlitre.
    Volume,
}

const COUNT_UNITS: &[(&str, i64)] = &[("ea", 1000), ("mc", 1)];
const WEIGHT_UNITS: &[(&str, i64)] = &[("kg", 1_000_000), ("g", 1000), ("mg", 1)];
const LENGTH_UNITS: &[(&str, i64)] = &[("m", 1000), ("cm", 10), ("mm", 1)];
const AREA_UNITS: &[(&str, i64)] = &[("m2", 1_000_000), ("cm2", 100), ("mm2", 1)];
const VOLUME_UNITS: &[(&str, i64)] = &[("l", 1_000_000), ("ml", 1000)];

impl Dimension {
    /// Every supported dimension.
    pub const ALL: [Dimension; 5] = [
        Dimension::Count,
        Dimension::Weight,
        Dimension::Length,
        Dimension::Area,
        Dimension::Volume,
    ];

    /// Lowercase name, as stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Dimension::Count => "count",
            Dimension::Weight => "weight",
            Dimension::Length => "length",
            Dimension::Area => "area",
            Dimension::Volume => "volume",
        }
    }

    /// `(unit, base units per one unit)` pairs for this dimension.
    pub const fn units(self) -> &'static [(&'static str, i64)] {
        match self {
            Dimension::Count => COUNT_UNITS,
            Dimension::Weight => WEIGHT_UNITS,
            Dimension::Length => LENGTH_UNITS,
            Dimension::Area => AREA_UNITS,
            Dimension::Volume => VOLUME_UNITS,
        }
    }

    /// Display unit used when an item has no usable unit of its own.
    pub const fn default_unit(self) -> (&'static str, i64) {
        match self {
            Dimension::Count => ("ea", 1000),
            Dimension::Weight => ("g", 1000),
            Dimension::Length => ("m", 1000),
            Dimension::Area => ("m2", 1_000_000),
            Dimension::Volume => ("l", 1_000_000),
        }
    }

    /// Looks a unit up in this dimension's table (trimmed, case-insensitive).
    pub fn lookup(self, uom: &str) -> Option<(&'static str, i64)> {
        let wanted = uom.trim().to_ascii_lowercase();
        self.units()
            .iter()
            .find(|(unit, _)| *unit == wanted)
            .copied()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnsupportedDimension {
                dimension: s.trim().to_string(),
            })
    }
}

// =============================================================================
// Unit Lookup
// =============================================================================

/// Base units per one `uom` for `dimension`.
pub fn uom_multiplier(dimension: Dimension, uom: &str) -> ValidationResult<i64> {
    dimension
        .lookup(uom)
        .map(|(_, multiplier)| multiplier)
        .ok_or_else(|| ValidationError::UnsupportedUom {
            dimension,
            uom: uom.trim().to_string(),
        })
}

/// Default display unit for a dimension.
pub fn default_unit_for(dimension: Dimension) -> &'static str {
    dimension.default_unit().0
}

/// The unit costs and reports are denominated in for an item.
///
/// The item's own unit when it is valid for the dimension, otherwise the
/// dimension default.
pub fn basis_uom_for(dimension: Dimension, item_uom: &str) -> &'static str {
    basis_unit(dimension, item_uom).0
}

/// `(unit, multiplier)` variant of [`basis_uom_for`].
pub fn basis_unit(dimension: Dimension, item_uom: &str) -> (&'static str, i64) {
    dimension
        .lookup(item_uom)
        .unwrap_or_else(|| dimension.default_unit())
}

// =============================================================================
// Normalization
// =============================================================================

/// Converts a human decimal quantity into integer base units.
///
/// ## Rules
/// - Thousands separators are dropped, a bare leading dot becomes `0.`
/// - Empty strings, bare signs and bare dots are rejected
/// - `quantity × multiplier` must be a whole number
/// - The result must be strictly positive
///
/// ## Example
/// ```rust
/// use kiln_core::units::{to_base_units, Dimension};
///
/// assert_eq!(to_base_units(Dimension::Count, "ea", "1.5").unwrap(), 1500);
/// assert_eq!(to_base_units(Dimension::Length, "cm", ".5").unwrap(), 5);
/// assert!(to_base_units(Dimension::Count, "ea", "0.0005").is_err());
/// ```
pub fn to_base_units(
    dimension: Dimension,
    uom: &str,
    quantity_decimal: &str,
) -> ValidationResult<i64> {
    let multiplier = uom_multiplier(dimension, uom)?;
    let invalid = || ValidationError::InvalidQuantity {
        field: "quantity_decimal".to_string(),
        value: quantity_decimal.trim().to_string(),
    };

    let value = parse_decimal(quantity_decimal).ok_or_else(invalid)?;
    let scaled = value
        .checked_mul(Decimal::from(multiplier))
        .ok_or_else(invalid)?;

    if !scaled.fract().is_zero() {
        return Err(ValidationError::FractionalBaseQuantityNotAllowed {
            dimension,
            uom: uom.trim().to_ascii_lowercase(),
            value: quantity_decimal.trim().to_string(),
        });
    }

    match scaled.to_i64() {
        Some(base) if base > 0 => Ok(base),
        _ => Err(invalid()),
    }
}

/// Converts a human cost per `cost_uom` into integer cents per base unit.
///
/// `round_half_up(unit_cost × 100 / multiplier)`. Negative costs are rejected.
///
/// ## Example
/// ```rust
/// use kiln_core::units::{to_base_cents, Dimension};
///
/// assert_eq!(to_base_cents(Dimension::Count, "ea", "5.00").unwrap(), 1);
/// assert_eq!(to_base_cents(Dimension::Count, "mc", "0.015").unwrap(), 2);
/// ```
pub fn to_base_cents(
    dimension: Dimension,
    cost_uom: &str,
    unit_cost_decimal: &str,
) -> ValidationResult<i64> {
    cost_to_cents(dimension, cost_uom, unit_cost_decimal, 1)
}

/// Converts a human cost per `cost_uom` into cents per display unit of an
/// item whose stored unit is `item_uom`.
///
/// This is the cost basis batches carry. Same rules as [`to_base_cents`],
/// rounded once at the end:
/// `round_half_up(unit_cost × 100 × basis_multiplier / cost_multiplier)`.
///
/// ## Example
/// ```rust
/// use kiln_core::units::{to_basis_cents, Dimension};
///
/// // 0.13 per ea on an "ea" item is 13¢ per ea
/// assert_eq!(to_basis_cents(Dimension::Count, "ea", "ea", "0.13").unwrap(), 13);
/// // 2.50 per kg on a "g" item is 0.25¢ per g, rounds to 0
/// assert_eq!(to_basis_cents(Dimension::Weight, "g", "kg", "2.50").unwrap(), 0);
/// // 0.02 per ml on an "l" item is 2000¢ per l
/// assert_eq!(to_basis_cents(Dimension::Volume, "l", "ml", "0.02").unwrap(), 2000);
/// ```
pub fn to_basis_cents(
    dimension: Dimension,
    item_uom: &str,
    cost_uom: &str,
    unit_cost_decimal: &str,
) -> ValidationResult<i64> {
    let (_, basis_multiplier) = basis_unit(dimension, item_uom);
    cost_to_cents(dimension, cost_uom, unit_cost_decimal, basis_multiplier)
}

fn cost_to_cents(
    dimension: Dimension,
    cost_uom: &str,
    unit_cost_decimal: &str,
    per_multiplier: i64,
) -> ValidationResult<i64> {
    let (_, multiplier) =
        dimension
            .lookup(cost_uom)
            .ok_or_else(|| ValidationError::UnsupportedCostUom {
                dimension,
                uom: cost_uom.trim().to_string(),
            })?;
    let invalid = || ValidationError::InvalidUnitCost {
        value: unit_cost_decimal.trim().to_string(),
    };

    let cost = parse_decimal(unit_cost_decimal).ok_or_else(invalid)?;
    if cost < Decimal::ZERO {
        return Err(invalid());
    }

    cost.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.checked_mul(Decimal::from(per_multiplier)))
        .and_then(|cents| cents.checked_div(Decimal::from(multiplier)))
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(invalid)
}

/// Base units rendered as an exact decimal in `uom`.
pub fn human_qty_from_base(dimension: Dimension, uom: &str, base: i64) -> ValidationResult<Decimal> {
    let multiplier = uom_multiplier(dimension, uom)?;
    Ok((Decimal::from(base) / Decimal::from(multiplier)).normalize())
}

/// Base units rendered as a normalized decimal string ("2.5", never "-0").
pub fn format_base_qty(dimension: Dimension, uom: &str, base: i64) -> ValidationResult<String> {
    let multiplier = uom_multiplier(dimension, uom)?;
    Ok(render_base(base, multiplier))
}

/// Renders `base / multiplier` without trailing zeros.
pub fn render_base(base: i64, multiplier: i64) -> String {
    let qty = (Decimal::from(base) / Decimal::from(multiplier)).normalize();
    if qty.is_zero() {
        return "0".to_string();
    }
    qty.to_string()
}

/// Parses a human decimal string. `None` for anything that isn't one.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();

    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };

    if body.is_empty() || body == "." {
        return None;
    }
    if body.matches('.').count() > 1 || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let mut padded = String::with_capacity(body.len() + 2);
    if body.starts_with('.') {
        padded.push('0');
    }
    padded.push_str(body);
    if body.ends_with('.') {
        padded.push('0');
    }

    let value = Decimal::from_str(&padded).ok()?;
    Some(if negative { -value } else { value })
}

// =============================================================================
// Unit Tests
// =============================================================================
