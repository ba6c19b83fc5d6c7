//! # Dashboard Read Model
//!
//! Read-only aggregates for a landing screen. Each figure comes from the
//! service that owns it, so the dashboard never disagrees with a per-module
//! report for the same window.
//!
//! ```text
//! DashboardSummary
//!   ├── inventory_value_cents  ◄── BatchLedger::valuation(None)
//!   ├── units_produced         ◄── completed runs, executed_at in window
//!   └── finance                ◄── FinanceLedger::profit_summary(window)
//! ```

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use kiln_core::finance::{ProfitSummary, ProfitWindow};

use crate::error::DbResult;
use crate::finance::FinanceLedger;
use crate::ledger::BatchLedger;
use crate::pool::LedgerSettings;
use crate::repository::{item, run};

/// Manufactured output of one item over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedItem {
    pub item_id: i64,
    pub name: String,
    pub uom: String,
    pub qty_base: i64,
    pub quantity_decimal: String,
    pub runs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub window: ProfitWindow,
    /// Current value of all open batches. Not windowed.
    pub inventory_value_cents: i64,
    pub units_produced: Vec<ProducedItem>,
    pub finance: ProfitSummary,
}

/// Read-only dashboard queries.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl Dashboard {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        Dashboard { pool, settings }
    }

    /// Output of completed runs executed in `[from, to)`, per item.
    ///
    /// Failed runs produce nothing and are not counted.
    pub async fn units_produced(&self, window: ProfitWindow) -> DbResult<Vec<ProducedItem>> {
        let rows = run::produced_between(&self.pool, window.from, window.to).await?;

        let mut produced = Vec::with_capacity(rows.len());
        for (item_id, qty_base, runs) in rows {
            let item = item::fetch(&self.pool, item_id).await?;
            let (uom, _) = item.basis_unit();
            produced.push(ProducedItem {
                item_id,
                quantity_decimal: item.display_qty(qty_base),
                name: item.name,
                uom: uom.to_string(),
                qty_base,
                runs,
            });
        }
        Ok(produced)
    }

    /// Inventory value, production and profit in one call.
    pub async fn summary(&self, window: ProfitWindow) -> DbResult<DashboardSummary> {
        let ledger = BatchLedger::new(self.pool.clone(), self.settings.clone());
        let finance = FinanceLedger::new(self.pool.clone(), self.settings.clone());

        let inventory_value_cents = ledger.valuation(None).await?.total_value_cents;
        let units_produced = self.units_produced(window).await?;
        let finance = finance.profit_summary(window).await?;

        debug!(
            inventory_value_cents,
            produced_items = units_produced.len(),
            net_revenue_cents = finance.net_revenue_cents,
            "Dashboard summary computed"
        );
        Ok(DashboardSummary {
            window,
            inventory_value_cents,
            units_produced,
            finance,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
