//! # Domain Types
//!
//! Row and value types shared by the ledger, the manufacturing engine and
//! the finance reports.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────┐  1:N  ┌──────────────┐  1:N  ┌──────────────┐        │
//! │  │    Item      │──────►│  ItemBatch   │──────►│ ItemMovement │        │
//! │  │  dimension   │       │ qty_initial  │       │ qty_change ± │        │
//! │  │  uom         │       │ qty_remaining│       │ unit_cost    │        │
//! │  │  qty_stored  │       │ unit_cost    │       │ source_id ───┼──┐     │
//! │  └──────────────┘       └──────────────┘       └──────────────┘  │     │
//! │                                                                   │     │
//! │  ┌──────────────┐  1:N  ┌──────────────┐       ┌──────────────┐  │     │
//! │  │   Recipe     │──────►│  RecipeItem  │       │  CashEvent   │  │     │
//! │  │  output_qty  │       │ qty_required │       │ amount_cents │  │     │
//! │  └──────┬───────┘       └──────────────┘       │ source_id ◄──┼──┘     │
//! │         │                                      └──────────────┘        │
//! │         ▼                                                               │
//! │  ┌─────────────────────┐                                               │
//! │  │  ManufacturingRun   │  status: created → completed                  │
//! │  │  meta (RunMeta JSON)│          created → failed_insufficient_stock  │
//! │  └─────────────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Integer Identity
//! Rows use autoincrement `i64` ids so `(created_at, id)` is insertion
//! order. Correlation between cash events and movements goes through the
//! opaque `source_id` string instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::units::{basis_unit, render_base, Dimension};

// =============================================================================
// Item
// =============================================================================

/// A trackable good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Item {
    pub id: i64,

    pub name: String,

    /// Measurement category; fixes which units are valid.
    pub dimension: Dimension,

    /// Display unit. Costs on this item's batches are cents per one of these.
    pub uom: String,

    /// Default sale price in cents per display unit.
    pub price_cents: Option<i64>,

    pub is_product: bool,

    /// Cached on-hand base quantity. Informational; batches are authoritative.
    pub qty_stored: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// `(unit, multiplier)` this item's costs and reports are denominated in.
    pub fn basis_unit(&self) -> (&'static str, i64) {
        basis_unit(self.dimension, &self.uom)
    }

    /// Renders a base quantity in the item's basis unit.
    pub fn display_qty(&self, base: i64) -> String {
        render_base(base, self.basis_unit().1)
    }
}

// =============================================================================
// Source Kind
// =============================================================================

/// What caused a batch, movement, or cash event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Purchase,
    StockIn,
    Manufacturing,
    RefundRestock,
    Adjustment,
    Seed,
    /// Consumption linked to a sale cash event.
    Sold,
    Loss,
    Theft,
    Other,
    Refund,
    Expense,
}

impl SourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            SourceKind::Purchase => "purchase",
            SourceKind::StockIn => "stock_in",
            SourceKind::Manufacturing => "manufacturing",
            SourceKind::RefundRestock => "refund_restock",
            SourceKind::Adjustment => "adjustment",
            SourceKind::Seed => "seed",
            SourceKind::Sold => "sold",
            SourceKind::Loss => "loss",
            SourceKind::Theft => "theft",
            SourceKind::Other => "other",
            SourceKind::Refund => "refund",
            SourceKind::Expense => "expense",
        }
    }
}

// =============================================================================
// Batches and Movements
// =============================================================================

/// One FIFO lot.
///
/// Only `qty_remaining` ever changes, and only downward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ItemBatch {
    pub id: i64,
    pub item_id: i64,
    pub qty_initial: i64,
    pub qty_remaining: i64,
    /// Cents per display unit of the owning item. Fixed at creation.
    pub unit_cost_cents: i64,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
    pub is_oversold: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One signed, append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ItemMovement {
    pub id: i64,
    pub item_id: i64,
    pub batch_id: Option<i64>,
    /// Negative = consumption, positive = stock-in.
    pub qty_change: i64,
    /// Cost of the batch this movement touched.
    pub unit_cost_cents: Option<i64>,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
    pub is_oversold: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Recipes
// =============================================================================

/// A named bill of materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub output_item_id: i64,
    /// Output per recipe batch, in the output item's base units.
    pub output_qty: i64,
    pub archived: bool,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One component line of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct RecipeItem {
    pub id: i64,
    pub recipe_id: i64,
    pub item_id: i64,
    /// Base units needed per `Recipe::output_qty`.
    pub qty_required: i64,
    pub is_optional: bool,
    pub sort_order: i64,
}

// =============================================================================
// Manufacturing Runs
// =============================================================================

/// Lifecycle of a manufacturing run. Both non-`Created` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Completed,
    FailedInsufficientStock,
}

impl RunStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Created)
    }
}

/// One production attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ManufacturingRun {
    pub id: i64,
    pub recipe_id: Option<i64>,
    pub output_item_id: i64,
    /// Output in base units.
    pub output_qty: i64,
    pub status: RunStatus,
    pub notes: Option<String>,
    /// Raw JSON of [`RunMeta`].
    pub meta: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl ManufacturingRun {
    /// Parses the stored meta blob.
    pub fn decode_meta(&self) -> Result<Option<RunMeta>, serde_json::Error> {
        self.meta
            .as_deref()
            .map(serde_json::from_str::<RunMeta>)
            .transpose()
    }
}

/// Gap between required and on-hand quantity for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Shortage {
    pub item_id: i64,
    pub required: i64,
    pub available: i64,
    pub missing: i64,
}

impl Shortage {
    pub fn new(item_id: i64, required: i64, available: i64) -> Self {
        Shortage {
            item_id,
            required,
            available,
            missing: (required - available).max(0),
        }
    }
}

/// One slice taken from one batch during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Allocation {
    pub item_id: i64,
    pub batch_id: i64,
    /// Base units taken (positive).
    pub qty: i64,
    pub unit_cost_cents: i64,
    pub line_cost_cents: i64,
}

/// Audit payload persisted on a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunMeta {
    Completed {
        output_qty_base: i64,
        cost_inputs_cents: i64,
        per_output_cents: i64,
        allocations: Vec<Allocation>,
        output_batch_id: i64,
    },
    FailedInsufficientStock { shortages: Vec<Shortage> },
}

// =============================================================================
// Cash Events
// =============================================================================

/// Kind of money-moving record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CashEventKind {
    Sale,
    Refund,
    Expense,
}

/// One append-only money record. Sales are positive, refunds and expenses
/// negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashEvent {
    pub id: i64,
    pub kind: CashEventKind,
    pub category: Option<String>,
    pub amount_cents: i64,
    pub item_id: Option<i64>,
    pub qty_base: Option<i64>,
    pub unit_price_cents: Option<i64>,
    pub source_kind: SourceKind,
    /// Shared with the movements this event caused.
    pub source_id: Option<String>,
    /// For refunds: the original sale's `source_id`.
    pub related_source_id: Option<String>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(dimension: Dimension, uom: &str) -> Item {
        Item {
            id: 1,
            name: "Copy paper".into(),
            dimension,
            uom: uom.into(),
            price_cents: None,
            is_product: false,
            qty_stored: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_item_basis_unit_falls_back() {
        assert_eq!(item(Dimension::Weight, "kg").basis_unit(), ("kg", 1_000_000));
        assert_eq!(item(Dimension::Weight, "ea").basis_unit(), ("g", 1000));
        assert_eq!(item(Dimension::Count, "ea").display_qty(-2500), "-2.5");
    }

    #[test]
    fn test_shortage_missing() {
        assert_eq!(Shortage::new(3, 6000, 4000).missing, 2000);
        assert_eq!(Shortage::new(3, 10, 20).missing, 0);
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Created.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::FailedInsufficientStock.is_terminal());
    }

    #[test]
    fn test_run_meta_json_shape() {
        let meta = RunMeta::Completed {
            output_qty_base: 2000,
            cost_inputs_cents: 80,
            per_output_cents: 40,
            allocations: vec![],
            output_batch_id: 9,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["cost_inputs_cents"], 80);
        assert_eq!(json["output_batch_id"], 9);

        let run = ManufacturingRun {
            id: 1,
            recipe_id: None,
            output_item_id: 2,
            output_qty: 2000,
            status: RunStatus::Completed,
            notes: None,
            meta: Some(json.to_string()),
            created_at: Utc::now(),
            executed_at: None,
        };
        assert_eq!(run.decode_meta().unwrap(), Some(meta));
    }

    #[test]
    fn test_source_kind_names() {
        assert_eq!(SourceKind::RefundRestock.as_str(), "refund_restock");
        let json = serde_json::to_value(SourceKind::StockIn).unwrap();
        assert_eq!(json, "stock_in");
    }
}
