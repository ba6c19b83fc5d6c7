//! # Finance Math
//!
//! Pure pieces of the cash ledger: the reporting window, the profit
//! summary and the weighted-average restock cost.
//!
//! ## Sign Convention
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Stored (CashEvent.amount_cents)      Reported (ProfitSummary)          │
//! │  ────────────────────────────────     ──────────────────────────────    │
//! │  sale      +500                       gross_revenue_cents   500         │
//! │  refund    -500                       refunds_cents         500 (abs)   │
//! │  expense   -120                       expenses_cents        120 (abs)   │
//! │                                       net_revenue_cents     0           │
//! │                                       margin_percent        0.00        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Events are always stored signed; aggregates always report magnitudes.

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::div_round_half_up;
use crate::validation::ValidationResult;

// =============================================================================
// Window
// =============================================================================

/// Half-open reporting window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfitWindow {
    #[ts(as = "String")]
    pub from: DateTime<Utc>,
    #[ts(as = "String")]
    pub to: DateTime<Utc>,
}

impl ProfitWindow {
    /// Window from two instants. `from` must not be after `to`.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> ValidationResult<Self> {
        if from > to {
            return Err(ValidationError::invalid_format("from", "must not be after to"));
        }
        Ok(ProfitWindow { from, to })
    }

    /// Inclusive calendar dates → `[from 00:00, to + 1 day 00:00)`.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::NaiveDate;
    /// use kiln_core::finance::ProfitWindow;
    ///
    /// let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
    /// let window = ProfitWindow::from_dates(day, day).unwrap();
    /// assert_eq!((window.to - window.from).num_hours(), 24);
    /// ```
    pub fn from_dates(from: NaiveDate, to: NaiveDate) -> ValidationResult<Self> {
        if from > to {
            return Err(ValidationError::invalid_format("from", "must not be after to"));
        }
        let end = to
            .checked_add_days(Days::new(1))
            .ok_or_else(|| ValidationError::invalid_format("to", "date out of range"))?;

        Ok(ProfitWindow {
            from: start_of_day(from)?,
            to: start_of_day(end)?,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.to
    }
}

fn start_of_day(date: NaiveDate) -> ValidationResult<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| ValidationError::invalid_format("date", "out of range"))
}

// =============================================================================
// Profit Summary
// =============================================================================

/// Signed cash totals for one window, as read from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CashTotals {
    pub sales_cents: i64,
    pub sale_count: i64,
    /// Signed (≤ 0).
    pub refunds_cents: i64,
    pub refund_count: i64,
    /// Signed (≤ 0).
    pub expenses_cents: i64,
}

/// Read-only profit aggregate. Integers are cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfitSummary {
    pub window: ProfitWindow,
    pub gross_revenue_cents: i64,
    /// Magnitude of refunds in the window.
    pub refunds_cents: i64,
    pub net_revenue_cents: i64,
    pub cogs_cents: i64,
    pub gross_profit_cents: i64,
    /// Magnitude of expenses in the window (not part of gross profit).
    pub expenses_cents: i64,
    /// Gross profit over net revenue, two decimals, `0` when net revenue is 0.
    #[ts(as = "String")]
    pub margin_percent: Decimal,
    pub sale_count: i64,
    pub refund_count: i64,
}

impl ProfitSummary {
    pub fn compute(window: ProfitWindow, totals: CashTotals, cogs_cents: i64) -> Self {
        let net_revenue_cents = totals.sales_cents + totals.refunds_cents;
        let gross_profit_cents = net_revenue_cents - cogs_cents;

        ProfitSummary {
            window,
            gross_revenue_cents: totals.sales_cents,
            refunds_cents: totals.refunds_cents.abs(),
            net_revenue_cents,
            cogs_cents,
            gross_profit_cents,
            expenses_cents: totals.expenses_cents.abs(),
            margin_percent: margin_percent(gross_profit_cents, net_revenue_cents),
            sale_count: totals.sale_count,
            refund_count: totals.refund_count,
        }
    }
}

/// `round_half_up(gross_profit / net_revenue × 100, 2)`, zero when there is
/// no net revenue.
pub fn margin_percent(gross_profit_cents: i64, net_revenue_cents: i64) -> Decimal {
    if net_revenue_cents == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(gross_profit_cents) * Decimal::ONE_HUNDRED / Decimal::from(net_revenue_cents))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// =============================================================================
// Restock Cost
// =============================================================================

/// Quantity-weighted mean cost: `Σ(qty × cost) / Σ qty`, half-up.
///
/// Quantities are magnitudes. `None` when there is nothing to average.
///
/// ## Example
/// ```rust
/// use kiln_core::finance::weighted_average_cost;
///
/// // 2 ea @ 10¢ and 1 ea @ 20¢ → 13.33 → 13
/// assert_eq!(weighted_average_cost(&[(2000, 10), (1000, 20)]), Some(13));
/// ```
pub fn weighted_average_cost(lines: &[(i64, i64)]) -> Option<i64> {
    let (weighted, qty) = lines
        .iter()
        .fold((0i128, 0i128), |(weighted, qty), (line_qty, cost)| {
            let line_qty = (*line_qty as i128).abs();
            (weighted + line_qty * *cost as i128, qty + line_qty)
        });

    if qty == 0 {
        return None;
    }
    i64::try_from(div_round_half_up(weighted, qty)).ok()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> ProfitWindow {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        ProfitWindow::from_dates(from, to).unwrap()
    }

    #[test]
    fn test_window_from_dates_is_half_open() {
        let w = window();
        assert!(w.contains(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        assert!(w.contains(Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap()));
        assert!(!w.contains(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        let a = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(ProfitWindow::from_dates(a, b).is_err());
        assert!(ProfitWindow::new(Utc::now(), Utc::now() - chrono::Duration::hours(1)).is_err());
    }

    #[test]
    fn test_full_refund_gives_zero_margin() {
        let totals = CashTotals {
            sales_cents: 500,
            sale_count: 1,
            refunds_cents: -500,
            refund_count: 1,
            expenses_cents: 0,
        };
        let summary = ProfitSummary::compute(window(), totals, 0);
        assert_eq!(summary.net_revenue_cents, 0);
        assert_eq!(summary.refunds_cents, 500);
        assert_eq!(summary.margin_percent, Decimal::ZERO);
    }

    #[test]
    fn test_profit_summary_arithmetic() {
        let totals = CashTotals {
            sales_cents: 1000,
            sale_count: 2,
            refunds_cents: -100,
            refund_count: 1,
            expenses_cents: -250,
        };
        let summary = ProfitSummary::compute(window(), totals, 300);
        assert_eq!(summary.gross_revenue_cents, 1000);
        assert_eq!(summary.net_revenue_cents, 900);
        assert_eq!(summary.gross_profit_cents, 600);
        assert_eq!(summary.expenses_cents, 250);
        // 600 / 900 = 66.666… → 66.67
        assert_eq!(summary.margin_percent, Decimal::new(6667, 2));
    }

    #[test]
    fn test_margin_percent_rounds_half_up() {
        // 1 / 8 × 100 = 12.5 exactly
        assert_eq!(margin_percent(1, 8), Decimal::new(1250, 2));
        // 1 / 16 × 100 = 6.25
        assert_eq!(margin_percent(1, 16), Decimal::new(625, 2));
        // 1 / 160 × 100 = 0.625 → 0.63
        assert_eq!(margin_percent(1, 160), Decimal::new(63, 2));
        assert_eq!(margin_percent(-1, 160), Decimal::new(-63, 2));
        assert_eq!(margin_percent(10, 0), Decimal::ZERO);
    }

    #[test]
    fn test_weighted_average_cost() {
        assert_eq!(weighted_average_cost(&[(2000, 10), (1000, 20)]), Some(13));
        assert_eq!(weighted_average_cost(&[(-2000, 10), (-1000, 20)]), Some(13));
        assert_eq!(weighted_average_cost(&[(1000, 15), (1000, 16)]), Some(16));
        assert_eq!(weighted_average_cost(&[]), None);
    }
}
