//! # Cash / Finance Ledger
//!
//! Sales, refunds and expenses, plus the read-only profit report.
//!
//! ## Correlation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_sale                                                            │
//! │    source_id = uuid ─┬─► item_movements (-qty, batch cost) × N          │
//! │                      └─► cash_events    (sale, +amount)                 │
//! │                          one transaction                                │
//! │                                                                         │
//! │  record_refund                                                          │
//! │    source_id = uuid ─┬─► cash_events    (refund, -amount,               │
//! │                      │                   related_source_id = sale's id) │
//! │                      └─► item_batches   (refund_restock, optional)      │
//! │                                                                         │
//! │  profit_summary [from, to)                                              │
//! │    COGS = Σ negative movements whose source_id belongs to a sale        │
//! │           in the window; refund restocks never enter COGS               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use kiln_core::finance::{weighted_average_cost, CashTotals, ProfitSummary, ProfitWindow};
use kiln_core::money::Money;
use kiln_core::units::{to_base_units, to_basis_cents};
use kiln_core::validation::{clean_optional_text, validate_amount_cents, validate_price_cents};
use kiln_core::{
    CashEvent, CashEventKind, CoreError, Dimension, ItemMovement, SourceKind, ValidationError,
};

use crate::error::DbResult;
use crate::journal::JournalEntry;
use crate::ledger::{add_batch_in, consume_fifo_in, StockedBatch};
use crate::pool::LedgerSettings;
use crate::repository::batch::NewBatch;
use crate::repository::cash::{self, NewCashEvent};
use crate::repository::item;
use crate::repository::movement;
use crate::uow::run_in_transaction;

// =============================================================================
// Requests and Receipts
// =============================================================================

/// A cash sale of a count item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    /// Cents per display unit. Defaults to the item's price, then 0.
    pub unit_price_cents: Option<i64>,
    pub notes: Option<String>,
    /// Backfill timestamp; defaults to now.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub source_id: String,
    pub cash_event: CashEvent,
    pub movements: Vec<ItemMovement>,
    pub cogs_cents: i64,
}

/// Inventory returned with a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestockRequest {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    /// Human cost per `cost_uom`. Only consulted without a related sale.
    pub unit_cost_decimal: Option<String>,
    pub cost_uom: Option<String>,
}

impl RestockRequest {
    pub fn new(item_id: i64, quantity_decimal: impl Into<String>, uom: impl Into<String>) -> Self {
        RestockRequest {
            item_id,
            quantity_decimal: quantity_decimal.into(),
            uom: uom.into(),
            unit_cost_decimal: None,
            cost_uom: None,
        }
    }

    /// Sets an explicit restock cost, e.g. `("0.13", "ea")`.
    pub fn cost(mut self, unit_cost_decimal: impl Into<String>, cost_uom: impl Into<String>) -> Self {
        self.unit_cost_decimal = Some(unit_cost_decimal.into());
        self.cost_uom = Some(cost_uom.into());
        self
    }

    fn explicit_cost(&self) -> Option<(&str, &str)> {
        match (self.unit_cost_decimal.as_deref(), self.cost_uom.as_deref()) {
            (Some(cost), Some(uom)) if !uom.trim().is_empty() => Some((cost, uom)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Either sign accepted; stored negative.
    pub amount_cents: i64,
    /// The original sale's `source_id`.
    pub related_source_id: Option<String>,
    pub restock: Option<RestockRequest>,
    pub category: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub source_id: String,
    pub cash_event: CashEvent,
    pub restocked: Option<StockedBatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRequest {
    /// Either sign accepted; stored negative.
    pub amount_cents: i64,
    pub category: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Service
// =============================================================================

/// Cash events and the profit report.
#[derive(Debug, Clone)]
pub struct FinanceLedger {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl FinanceLedger {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        FinanceLedger { pool, settings }
    }

    /// Records a sale: FIFO consumption and the sale event in one transaction.
    ///
    /// ## Rules
    /// - Count-dimension items only
    /// - Amount is `round_half_up(unit_price × quantity)`
    /// - Movements and event share a freshly generated `source_id`
    pub async fn record_sale(&self, request: SaleRequest) -> DbResult<SaleReceipt> {
        self.settings.ensure_writable()?;

        let item = item::fetch(&self.pool, request.item_id).await?;
        if item.dimension != Dimension::Count {
            return Err(CoreError::SaleCountOnly {
                item_id: item.id,
                dimension: item.dimension,
            }
            .into());
        }

        let qty_base = to_base_units(item.dimension, &request.uom, &request.quantity_decimal)?;
        let unit_price_cents = request.unit_price_cents.or(item.price_cents).unwrap_or(0);
        validate_price_cents("unit_price_cents", unit_price_cents)?;

        let (_, multiplier) = item.basis_unit();
        let amount = Money::line_total(unit_price_cents, qty_base, multiplier);
        let source_id = Uuid::new_v4().simple().to_string();
        let at = request.created_at.unwrap_or_else(Utc::now);
        let event = NewCashEvent {
            kind: CashEventKind::Sale,
            category: None,
            amount_cents: amount.cents(),
            item_id: Some(item.id),
            qty_base: Some(qty_base),
            unit_price_cents: Some(unit_price_cents),
            source_kind: SourceKind::Sold,
            source_id: Some(source_id.clone()),
            related_source_id: None,
            notes: clean_optional_text(request.notes.as_deref()),
            created_at: at,
        };

        let item_id = item.id;
        let (cash_event, movements) = run_in_transaction(&self.pool, {
            let source_id = source_id.clone();
            move |conn| {
                Box::pin(async move {
                    let movements =
                        consume_fifo_in(conn, item_id, qty_base, SourceKind::Sold, Some(source_id.as_str()), at)
                            .await?;
                    let cash_event = cash::insert(conn, event).await?;
                    Ok((cash_event, movements))
                })
            }
        })
        .await?;

        let cogs: Money = movements
            .iter()
            .map(|m| Money::line_total(m.unit_cost_cents.unwrap_or(0), -m.qty_change, multiplier))
            .sum();

        info!(
            item_id,
            qty_base,
            amount_cents = cash_event.amount_cents,
            cogs_cents = cogs.cents(),
            source_id = %source_id,
            "Sale recorded"
        );
        self.settings
            .journal(JournalEntry::inventory(
                "sale",
                json!({
                    "cash_event_id": cash_event.id,
                    "item_id": item_id,
                    "qty_base": qty_base,
                    "amount_cents": cash_event.amount_cents,
                    "source_id": source_id,
                }),
            ))
            .await;

        Ok(SaleReceipt {
            source_id,
            cash_event,
            movements,
            cogs_cents: cogs.cents(),
        })
    }

    /// Records a refund, optionally restocking inventory in the same unit.
    ///
    /// ## Restock Cost
    /// ```text
    /// related_source_id given      → weighted average of the sale's negative
    ///                                movements for the item
    /// else unit_cost_decimal +     → normalized to cents per display unit
    ///      cost_uom given
    /// else                         → validation error, nothing written
    /// ```
    /// The restock batch is dated when it is inserted, so a backfilled refund
    /// never jumps ahead of stock already on the shelf.
    pub async fn record_refund(&self, request: RefundRequest) -> DbResult<RefundReceipt> {
        self.settings.ensure_writable()?;

        let magnitude = validate_amount_cents("amount_cents", request.amount_cents)?;
        let related_source_id = clean_optional_text(request.related_source_id.as_deref());

        let restock = match &request.restock {
            Some(restock) => {
                let item = item::fetch(&self.pool, restock.item_id).await?;
                let qty_base = to_base_units(item.dimension, &restock.uom, &restock.quantity_decimal)?;
                let explicit = match (related_source_id.is_some(), restock.explicit_cost()) {
                    (true, _) => None,
                    (false, Some((cost, cost_uom))) => {
                        Some(to_basis_cents(item.dimension, &item.uom, cost_uom, cost)?)
                    }
                    (false, None) => {
                        return Err(ValidationError::RestockUnitCostRequiredWithoutRelatedSourceId.into())
                    }
                };
                Some((item.id, qty_base, explicit))
            }
            None => None,
        };

        let source_id = Uuid::new_v4().simple().to_string();
        let at = request.created_at.unwrap_or_else(Utc::now);
        let event = NewCashEvent {
            kind: CashEventKind::Refund,
            category: clean_optional_text(request.category.as_deref()),
            amount_cents: -magnitude,
            item_id: restock.map(|(item_id, _, _)| item_id),
            qty_base: restock.map(|(_, qty_base, _)| qty_base),
            unit_price_cents: None,
            source_kind: SourceKind::Refund,
            source_id: Some(source_id.clone()),
            related_source_id: related_source_id.clone(),
            notes: clean_optional_text(request.notes.as_deref()),
            created_at: at,
        };

        let (cash_event, restocked) = run_in_transaction(&self.pool, {
            let source_id = source_id.clone();
            move |conn| {
                Box::pin(async move {
                    let restock_batch = match restock {
                        Some((item_id, qty_base, explicit)) => {
                            let unit_cost_cents = match (related_source_id.as_deref(), explicit) {
                                (Some(related), _) => related_sale_cost(conn, item_id, related).await?,
                                (None, Some(cents)) => cents,
                                (None, None) => {
                                    return Err(ValidationError::RestockUnitCostRequiredWithoutRelatedSourceId.into())
                                }
                            };
                            Some(NewBatch {
                                item_id,
                                qty_base,
                                unit_cost_cents,
                                source_kind: SourceKind::RefundRestock,
                                source_id: Some(source_id),
                            })
                        }
                        None => None,
                    };

                    let cash_event = cash::insert(conn, event).await?;
                    let restocked = match restock_batch {
                        Some(new) => Some(add_batch_in(conn, new, Utc::now()).await?),
                        None => None,
                    };
                    Ok((cash_event, restocked))
                })
            }
        })
        .await?;

        info!(
            amount_cents = cash_event.amount_cents,
            restocked = restocked.is_some(),
            source_id = %source_id,
            "Refund recorded"
        );
        self.settings
            .journal(JournalEntry::inventory(
                "refund",
                json!({
                    "cash_event_id": cash_event.id,
                    "amount_cents": cash_event.amount_cents,
                    "related_source_id": cash_event.related_source_id,
                    "restock_batch_id": restocked.as_ref().map(|r| r.batch_id),
                }),
            ))
            .await;

        Ok(RefundReceipt {
            source_id,
            cash_event,
            restocked,
        })
    }

    /// Records an expense. No inventory linkage.
    pub async fn record_expense(&self, request: ExpenseRequest) -> DbResult<CashEvent> {
        self.settings.ensure_writable()?;

        let magnitude = validate_amount_cents("amount_cents", request.amount_cents)?;
        let event = NewCashEvent {
            kind: CashEventKind::Expense,
            category: clean_optional_text(request.category.as_deref()),
            amount_cents: -magnitude,
            item_id: None,
            qty_base: None,
            unit_price_cents: None,
            source_kind: SourceKind::Expense,
            source_id: Some(Uuid::new_v4().simple().to_string()),
            related_source_id: None,
            notes: clean_optional_text(request.notes.as_deref()),
            created_at: request.created_at.unwrap_or_else(Utc::now),
        };

        let cash_event = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move { cash::insert(conn, event).await })
        })
        .await?;

        info!(amount_cents = cash_event.amount_cents, "Expense recorded");
        self.settings
            .journal(JournalEntry::inventory(
                "expense",
                json!({ "cash_event_id": cash_event.id, "amount_cents": cash_event.amount_cents }),
            ))
            .await;
        Ok(cash_event)
    }

    /// Revenue, COGS and margin over `[from, to)`.
    pub async fn profit_summary(&self, window: ProfitWindow) -> DbResult<ProfitSummary> {
        let events = cash::list_between(&self.pool, window.from, window.to).await?;

        let mut totals = CashTotals::default();
        for event in &events {
            match event.kind {
                CashEventKind::Sale => {
                    totals.sales_cents += event.amount_cents;
                    totals.sale_count += 1;
                }
                CashEventKind::Refund => {
                    totals.refunds_cents += event.amount_cents;
                    totals.refund_count += 1;
                }
                CashEventKind::Expense => totals.expenses_cents += event.amount_cents,
            }
        }

        let cogs_lines: Vec<(i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT m.item_id, m.qty_change, m.unit_cost_cents \
             FROM item_movements m \
             JOIN cash_events c ON c.source_id = m.source_id \
             WHERE c.kind = 'sale' AND c.created_at >= ? AND c.created_at < ? \
               AND m.qty_change < 0 \
             ORDER BY m.id",
        )
        .bind(window.from)
        .bind(window.to)
        .fetch_all(&self.pool)
        .await?;

        let mut multipliers: HashMap<i64, i64> = HashMap::new();
        let mut cogs = Money::zero();
        for (item_id, qty_change, unit_cost_cents) in cogs_lines {
            let multiplier = match multipliers.get(&item_id) {
                Some(m) => *m,
                None => {
                    let m = item::fetch(&self.pool, item_id).await?.basis_unit().1;
                    multipliers.insert(item_id, m);
                    m
                }
            };
            cogs += Money::line_total(unit_cost_cents.unwrap_or(0), -qty_change, multiplier);
        }

        debug!(
            events = events.len(),
            cogs_cents = cogs.cents(),
            "Profit summary computed"
        );
        Ok(ProfitSummary::compute(window, totals, cogs.cents()))
    }

    /// Cash events in `[from, to)`, oldest first.
    pub async fn list_cash_events(&self, window: ProfitWindow) -> DbResult<Vec<CashEvent>> {
        cash::list_between(&self.pool, window.from, window.to).await
    }
}

/// Weighted-average cost of the item's negative movements under a sale.
async fn related_sale_cost(
    conn: &mut SqliteConnection,
    item_id: i64,
    related_source_id: &str,
) -> DbResult<i64> {
    let lines: Vec<(i64, i64)> = movement::list_for_source(&mut *conn, related_source_id)
        .await?
        .into_iter()
        .filter(|m| m.item_id == item_id && m.qty_change < 0)
        .map(|m| (m.qty_change, m.unit_cost_cents.unwrap_or(0)))
        .collect();

    weighted_average_cost(&lines).ok_or_else(|| {
        CoreError::RelatedSaleNotFound {
            item_id,
            related_source_id: related_source_id.to_string(),
        }
        .into()
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
