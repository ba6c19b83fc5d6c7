//! # Money Module
//!
//! Integer cents and the half-up rounding every cost roll-up goes through.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  COST ROLL-UPS WITHOUT FLOATS                                           │
//! │                                                                         │
//! │  Batch: 4 ea @ 10¢/ea, stored as 4000 base units                        │
//! │                                                                         │
//! │  line cost = round_half_up(10 × 4000 / 1000) = 40¢                      │
//! │              └── i128 numerator, one division, one rounding step       │
//! │                                                                         │
//! │  The same inputs give the same cents on every run, on every machine.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding
//! Half-up means half away from zero: `2.5 → 3`, `-2.5 → -3`. Never banker's
//! rounding. All helpers here share [`div_round_half_up`].
//!
//! ## Usage
//! ```rust
//! use kiln_core::money::Money;
//!
//! // 2.5 ea at 10¢ per ea (1 ea = 1000 base units)
//! let line = Money::line_total(10, 2500, 1000);
//! assert_eq!(line.cents(), 25);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Rounding Helpers
// =============================================================================

/// Divides with half-up (away from zero) rounding.
///
/// `den` must be positive.
///
/// ## Example
/// ```rust
/// use kiln_core::money::div_round_half_up;
///
/// assert_eq!(div_round_half_up(5, 2), 3);
/// assert_eq!(div_round_half_up(-5, 2), -3);
/// assert_eq!(div_round_half_up(40, 3), 13);
/// ```
pub fn div_round_half_up(num: i128, den: i128) -> i128 {
    debug_assert!(den > 0, "denominator must be positive");
    if num >= 0 {
        (2 * num + den) / (2 * den)
    } else {
        -((2 * -num + den) / (2 * den))
    }
}

/// `round_half_up(value × numer / denom)` clamped into `i64`.
pub fn scale_half_up(value: i64, numer: i64, denom: i64) -> i64 {
    let scaled = div_round_half_up(value as i128 * numer as i128, denom as i128);
    i64::try_from(scaled).unwrap_or(if scaled > 0 { i64::MAX } else { i64::MIN })
}

// =============================================================================
// Money Type
// =============================================================================

/// A signed amount of cents.
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  batch.unit_cost_cents ──► Money::line_total ──► cost_inputs_cents      │
/// │                                                 │                       │
/// │                                                 └──► per_output_cents   │
/// │                                                                         │
/// │  item.price_cents ──► Money::line_total ──► sale amount_cents           │
/// │                                                                         │
/// │  sale movements ──► Money::line_total ──► COGS                          │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Cost of `qty_base` base units priced at `unit_cents` per human unit.
    ///
    /// `multiplier` is the base units per human unit of the item's basis
    /// unit. The base quantity is turned into a human quantity first, then
    /// priced, then rounded half-up once.
    ///
    /// ## Example
    /// ```rust
    /// use kiln_core::money::Money;
    ///
    /// // 4 ea @ 10¢ and 2 ea @ 20¢
    /// let total = Money::line_total(10, 4000, 1000) + Money::line_total(20, 2000, 1000);
    /// assert_eq!(total.cents(), 80);
    /// ```
    pub fn line_total(unit_cents: i64, qty_base: i64, multiplier: i64) -> Money {
        Money(scale_half_up(unit_cents, qty_base, multiplier))
    }

    /// Cost per human unit when `self` was spent on `qty_base` base units.
    ///
    /// `None` when the quantity is zero or negative.
    pub fn per_unit(&self, qty_base: i64, multiplier: i64) -> Option<Money> {
        if qty_base <= 0 {
            return None;
        }
        Some(Money(scale_half_up(self.0, multiplier, qty_base)))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly rendering (`$10.99`, `-$5.50`).
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div_round_half_up() {
        assert_eq!(div_round_half_up(0, 7), 0);
        assert_eq!(div_round_half_up(1, 2), 1);
        assert_eq!(div_round_half_up(1, 3), 0);
        assert_eq!(div_round_half_up(2, 3), 1);
        assert_eq!(div_round_half_up(-1, 2), -1);
        assert_eq!(div_round_half_up(-1, 3), 0);
        // Not banker's rounding: 2.5 goes up
        assert_eq!(div_round_half_up(5, 2), 3);
    }

    #[test]
    fn test_scale_half_up_clamps() {
        assert_eq!(scale_half_up(i64::MAX, 4, 1), i64::MAX);
        assert_eq!(scale_half_up(i64::MIN, 4, 1), i64::MIN);
        assert_eq!(scale_half_up(13, 1, 2), 7);
    }

    #[test]
    fn test_line_total() {
        // 2.5 ea @ 10¢
        assert_eq!(Money::line_total(10, 2500, 1000).cents(), 25);
        // 1 mc (a thousandth of an each) @ 10¢/ea rounds to zero
        assert_eq!(Money::line_total(10, 1, 1000).cents(), 0);
        // 1.5 kg @ 3¢/kg = 4.5 → 5
        assert_eq!(Money::line_total(3, 1_500_000, 1_000_000).cents(), 5);
    }

    #[test]
    fn test_per_unit() {
        // 80¢ spent on 2 ea
        assert_eq!(Money::from_cents(80).per_unit(2000, 1000), Some(Money::from_cents(40)));
        // 100¢ on 3 ea = 33.33 → 33
        assert_eq!(Money::from_cents(100).per_unit(3000, 1000), Some(Money::from_cents(33)));
        assert_eq!(Money::from_cents(80).per_unit(0, 1000), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "$10.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-$5.50");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(500);
        let b = Money::from_cents(200);
        assert_eq!((a + b).cents(), 700);
        assert_eq!((a - b).cents(), 300);
        assert_eq!((-a).cents(), -500);
        assert!((-a).is_negative());
        assert_eq!((-a).abs(), a);

        let total: Money = [a, b, Money::from_cents(-100)].into_iter().sum();
        assert_eq!(total.cents(), 600);
    }
}
