//! # Batch Ledger
//!
//! FIFO inventory: batches in, movements out, never oversold.
//!
//! ## FIFO Consumption
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  consume 6 ea from item 1                                               │
//! │                                                                         │
//! │  1. lock open batches            (no-op UPDATE, see repository::batch)  │
//! │  2. read open batches            ORDER BY created_at, id                │
//! │                                                                         │
//! │     batch 10  t1  4 ea @ 10¢  ──► take 4   movement -4000 @ 10¢         │
//! │     batch 11  t2  4 ea @ 20¢  ──► take 2   movement -2000 @ 20¢         │
//! │     batch 12  t3  4 ea @ 30¢      untouched                             │
//! │                                                                         │
//! │  3. available < requested?  → InsufficientStock, nothing written        │
//! │  4. items.qty_stored -= 6000                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Boundaries
//! [`add_batch_in`] and [`consume_fifo_in`] never commit; they join whatever
//! unit of work the caller opened. The `BatchLedger` methods wrap them in
//! their own [`run_in_transaction`] and journal after commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use kiln_core::money::Money;
use kiln_core::units::to_base_units;
use kiln_core::validation::{clean_optional_text, validate_positive, validate_unit_cost_cents};
use kiln_core::{
    CashEvent, CoreError, ItemBatch, ItemMovement, Shortage, SourceKind, ValidationError,
};

use crate::error::DbResult;
use crate::finance::{FinanceLedger, SaleRequest};
use crate::journal::JournalEntry;
use crate::pool::LedgerSettings;
use crate::repository::batch::{self, NewBatch};
use crate::repository::item;
use crate::repository::movement::{self, NewMovement};
use crate::uow::run_in_transaction;

/// Source kinds that may open a batch.
const STOCK_IN_KINDS: [SourceKind; 6] = [
    SourceKind::Purchase,
    SourceKind::StockIn,
    SourceKind::Manufacturing,
    SourceKind::RefundRestock,
    SourceKind::Adjustment,
    SourceKind::Seed,
];

// =============================================================================
// Transactional Primitives
// =============================================================================

/// A batch together with the positive movement that opened it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockedBatch {
    pub batch_id: i64,
    pub movement: ItemMovement,
}

/// Appends a batch, its positive movement, and bumps the item cache.
pub async fn add_batch_in(
    conn: &mut SqliteConnection,
    new: NewBatch,
    at: DateTime<Utc>,
) -> DbResult<StockedBatch> {
    validate_positive("qty_base", new.qty_base)?;
    validate_unit_cost_cents(new.unit_cost_cents)?;
    if !STOCK_IN_KINDS.contains(&new.source_kind) {
        return Err(ValidationError::NotAllowed {
            field: "source_kind".to_string(),
            allowed: STOCK_IN_KINDS.iter().map(|k| k.as_str().to_string()).collect(),
        }
        .into());
    }

    let batch_id = batch::insert(conn, &new, at).await?;
    let movement = movement::insert(
        conn,
        NewMovement {
            item_id: new.item_id,
            batch_id: Some(batch_id),
            qty_change: new.qty_base,
            unit_cost_cents: Some(new.unit_cost_cents),
            source_kind: new.source_kind,
            source_id: new.source_id,
        },
        at,
    )
    .await?;
    item::bump_qty_stored(conn, new.item_id, new.qty_base).await?;

    debug!(
        item_id = new.item_id,
        batch_id,
        qty_base = new.qty_base,
        unit_cost_cents = new.unit_cost_cents,
        "Batch added"
    );
    Ok(StockedBatch { batch_id, movement })
}

/// Consumes `qty_base` oldest-first. All or nothing.
///
/// Fails with `InsufficientStock` before any write when the open batches
/// cannot cover the request.
pub async fn consume_fifo_in(
    conn: &mut SqliteConnection,
    item_id: i64,
    qty_base: i64,
    source_kind: SourceKind,
    source_id: Option<&str>,
    at: DateTime<Utc>,
) -> DbResult<Vec<ItemMovement>> {
    validate_positive("qty_base", qty_base)?;

    batch::lock_open(conn, item_id).await?;
    let open = batch::list_open(&mut *conn, item_id).await?;

    let available: i64 = open.iter().map(|b| b.qty_remaining).sum();
    if available < qty_base {
        debug!(item_id, qty_base, available, "FIFO consumption refused");
        return Err(CoreError::InsufficientStock {
            shortages: vec![Shortage::new(item_id, qty_base, available)],
            run_id: None,
        }
        .into());
    }

    let mut still_needed = qty_base;
    let mut movements = Vec::new();
    for open_batch in open {
        if still_needed == 0 {
            break;
        }
        let take = open_batch.qty_remaining.min(still_needed);

        batch::decrement(conn, open_batch.id, take).await?;
        let moved = movement::insert(
            conn,
            NewMovement {
                item_id,
                batch_id: Some(open_batch.id),
                qty_change: -take,
                unit_cost_cents: Some(open_batch.unit_cost_cents),
                source_kind,
                source_id: source_id.map(str::to_string),
            },
            at,
        )
        .await?;
        movements.push(moved);
        still_needed -= take;
    }

    item::bump_qty_stored(conn, item_id, -qty_base).await?;

    debug!(
        item_id,
        qty_base,
        batches_touched = movements.len(),
        "FIFO consumption applied"
    );
    Ok(movements)
}

// =============================================================================
// Request / Report Types
// =============================================================================

/// One line of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    /// Cents per display unit of the item.
    pub unit_cost_cents: i64,
}

/// What a purchase wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub source_id: String,
    pub batch_ids: Vec<i64>,
}

/// Why stock is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOutReason {
    Sold,
    Loss,
    Theft,
    Other,
}

impl StockOutReason {
    pub fn source_kind(self) -> SourceKind {
        match self {
            StockOutReason::Sold => SourceKind::Sold,
            StockOutReason::Loss => SourceKind::Loss,
            StockOutReason::Theft => SourceKind::Theft,
            StockOutReason::Other => SourceKind::Other,
        }
    }
}

/// Input for [`BatchLedger::stock_out`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockOutRequest {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    pub reason: StockOutReason,
    /// With `reason = sold`, also record a sale cash event.
    #[serde(default)]
    pub record_cash_event: bool,
    pub unit_price_cents: Option<i64>,
    pub notes: Option<String>,
}

/// What a stock-out wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockOutOutcome {
    pub source_id: String,
    pub movements: Vec<ItemMovement>,
    pub cash_event: Option<CashEvent>,
}

/// Remaining stock of one item, costed per batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemValuation {
    pub item_id: i64,
    pub name: String,
    pub uom: String,
    pub qty_base: i64,
    pub quantity_decimal: String,
    pub value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub items: Vec<ItemValuation>,
    pub total_value_cents: i64,
}

/// A movement rendered for history screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementView {
    pub id: i64,
    pub batch_id: Option<i64>,
    /// Signed, in `uom`.
    pub quantity_decimal: String,
    pub uom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty_base: Option<i64>,
    pub unit_cost_cents: Option<i64>,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Service
// =============================================================================

/// FIFO batch ledger service.
#[derive(Debug, Clone)]
pub struct BatchLedger {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl BatchLedger {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        BatchLedger { pool, settings }
    }

    /// Appends a batch and its positive movement. Returns the batch id.
    pub async fn add_batch(
        &self,
        item_id: i64,
        qty_base: i64,
        unit_cost_cents: i64,
        source_kind: SourceKind,
        source_id: Option<String>,
    ) -> DbResult<i64> {
        self.settings.ensure_writable()?;

        let new = NewBatch {
            item_id,
            qty_base,
            unit_cost_cents,
            source_kind,
            source_id,
        };
        let stocked = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move {
                item::fetch(&mut *conn, new.item_id).await?;
                add_batch_in(conn, new, Utc::now()).await
            })
        })
        .await?;

        info!(item_id, batch_id = stocked.batch_id, source_kind = source_kind.as_str(), "Stock added");
        self.settings
            .journal(JournalEntry::inventory(
                "add_batch",
                json!({
                    "item_id": item_id,
                    "batch_id": stocked.batch_id,
                    "qty_base": qty_base,
                    "unit_cost_cents": unit_cost_cents,
                    "source_kind": source_kind,
                }),
            ))
            .await;
        Ok(stocked.batch_id)
    }

    /// Consumes oldest-first in its own transaction.
    pub async fn consume_fifo(
        &self,
        item_id: i64,
        qty_base: i64,
        source_kind: SourceKind,
        source_id: Option<String>,
    ) -> DbResult<Vec<ItemMovement>> {
        self.settings.ensure_writable()?;

        let movements = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move {
                item::fetch(&mut *conn, item_id).await?;
                consume_fifo_in(conn, item_id, qty_base, source_kind, source_id.as_deref(), Utc::now())
                    .await
            })
        })
        .await?;

        info!(item_id, qty_base, source_kind = source_kind.as_str(), "Stock consumed");
        self.settings
            .journal(JournalEntry::inventory(
                "consume",
                json!({
                    "item_id": item_id,
                    "qty_base": qty_base,
                    "source_kind": source_kind,
                    "movement_ids": movements.iter().map(|m| m.id).collect::<Vec<_>>(),
                }),
            ))
            .await;
        Ok(movements)
    }

    /// Σ qty_remaining. The authoritative on-hand quantity.
    pub async fn on_hand_qty(&self, item_id: i64) -> DbResult<i64> {
        batch::sum_remaining(&self.pool, item_id).await
    }

    /// Every batch of an item, oldest first.
    pub async fn batches(&self, item_id: i64) -> DbResult<Vec<ItemBatch>> {
        batch::list_for_item(&self.pool, item_id).await
    }

    /// Receives `quantity_decimal uom` at `unit_cost_cents` per display unit.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let batch_id = db.ledger().stock_in(paper.id, "4", "ea", 10, None).await?;
    /// ```
    pub async fn stock_in(
        &self,
        item_id: i64,
        quantity_decimal: &str,
        uom: &str,
        unit_cost_cents: i64,
        source_id: Option<String>,
    ) -> DbResult<i64> {
        let item = item::fetch(&self.pool, item_id).await?;
        let qty_base = to_base_units(item.dimension, uom, quantity_decimal)?;
        self.add_batch(item_id, qty_base, unit_cost_cents, SourceKind::StockIn, source_id)
            .await
    }

    /// Receives several lines in one transaction under one source id.
    pub async fn purchase(
        &self,
        lines: Vec<PurchaseLine>,
        source_id: Option<String>,
    ) -> DbResult<PurchaseReceipt> {
        self.settings.ensure_writable()?;
        if lines.is_empty() {
            return Err(ValidationError::required("lines").into());
        }

        let source_id = source_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let mut batches = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = item::fetch(&self.pool, line.item_id).await?;
            batches.push(NewBatch {
                item_id: item.id,
                qty_base: to_base_units(item.dimension, &line.uom, &line.quantity_decimal)?,
                unit_cost_cents: line.unit_cost_cents,
                source_kind: SourceKind::Purchase,
                source_id: Some(source_id.clone()),
            });
        }

        let batch_ids = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move {
                let at = Utc::now();
                let mut ids = Vec::with_capacity(batches.len());
                for new in batches {
                    ids.push(add_batch_in(&mut *conn, new, at).await?.batch_id);
                }
                Ok(ids)
            })
        })
        .await?;

        info!(source_id = %source_id, lines = batch_ids.len(), "Purchase recorded");
        self.settings
            .journal(JournalEntry::inventory(
                "purchase",
                json!({ "source_id": source_id, "batch_ids": batch_ids }),
            ))
            .await;
        Ok(PurchaseReceipt {
            source_id,
            batch_ids,
        })
    }

    /// Removes stock for a reason.
    ///
    /// `sold` with `record_cash_event` goes through the sale path so the
    /// movements and the cash event share one transaction and one source id.
    pub async fn stock_out(&self, request: StockOutRequest) -> DbResult<StockOutOutcome> {
        self.settings.ensure_writable()?;

        if request.reason == StockOutReason::Sold && request.record_cash_event {
            let finance = FinanceLedger::new(self.pool.clone(), self.settings.clone());
            let sale = finance
                .record_sale(SaleRequest {
                    item_id: request.item_id,
                    quantity_decimal: request.quantity_decimal,
                    uom: request.uom,
                    unit_price_cents: request.unit_price_cents,
                    notes: request.notes,
                    created_at: None,
                })
                .await?;
            return Ok(StockOutOutcome {
                source_id: sale.source_id,
                movements: sale.movements,
                cash_event: Some(sale.cash_event),
            });
        }

        let item = item::fetch(&self.pool, request.item_id).await?;
        let qty_base = to_base_units(item.dimension, &request.uom, &request.quantity_decimal)?;
        let source_id = Uuid::new_v4().simple().to_string();

        let movements = self
            .consume_fifo(item.id, qty_base, request.reason.source_kind(), Some(source_id.clone()))
            .await?;

        Ok(StockOutOutcome {
            source_id,
            movements,
            cash_event: None,
        })
    }

    /// Signed correction in base units.
    ///
    /// Positive opens a zero-cost `adjustment` batch; negative consumes FIFO
    /// tagged `adjustment`. Zero is rejected.
    pub async fn adjust(
        &self,
        item_id: i64,
        qty_base_delta: i64,
        notes: Option<&str>,
    ) -> DbResult<Vec<ItemMovement>> {
        self.settings.ensure_writable()?;
        if qty_base_delta == 0 {
            return Err(ValidationError::InvalidQuantity {
                field: "qty_base".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        let source_id = Uuid::new_v4().simple().to_string();
        let notes = clean_optional_text(notes);

        let movements = run_in_transaction(&self.pool, {
            let source_id = source_id.clone();
            move |conn| {
                Box::pin(async move {
                    item::fetch(&mut *conn, item_id).await?;
                    let at = Utc::now();
                    if qty_base_delta > 0 {
                        let new = NewBatch {
                            item_id,
                            qty_base: qty_base_delta,
                            unit_cost_cents: 0,
                            source_kind: SourceKind::Adjustment,
                            source_id: Some(source_id),
                        };
                        Ok(vec![add_batch_in(conn, new, at).await?.movement])
                    } else {
                        consume_fifo_in(
                            conn,
                            item_id,
                            -qty_base_delta,
                            SourceKind::Adjustment,
                            Some(source_id.as_str()),
                            at,
                        )
                        .await
                    }
                })
            }
        })
        .await?;

        info!(item_id, qty_base_delta, "Stock adjusted");
        self.settings
            .journal(JournalEntry::inventory(
                "adjust",
                json!({
                    "item_id": item_id,
                    "qty_base_delta": qty_base_delta,
                    "source_id": source_id,
                    "notes": notes,
                }),
            ))
            .await;
        Ok(movements)
    }

    /// Remaining stock costed per batch, for one item or all items.
    pub async fn valuation(&self, item_id: Option<i64>) -> DbResult<Valuation> {
        let items = match item_id {
            Some(id) => vec![item::fetch(&self.pool, id).await?],
            None => {
                item::ItemRepository::new(self.pool.clone(), self.settings.clone())
                    .list()
                    .await?
            }
        };

        let mut rows = Vec::with_capacity(items.len());
        let mut total = Money::zero();
        for item in items {
            let (uom, multiplier) = item.basis_unit();
            let open = batch::list_open(&self.pool, item.id).await?;

            let qty_base: i64 = open.iter().map(|b| b.qty_remaining).sum();
            let value: Money = open
                .iter()
                .map(|b| Money::line_total(b.unit_cost_cents, b.qty_remaining, multiplier))
                .sum();
            total += value;

            rows.push(ItemValuation {
                item_id: item.id,
                quantity_decimal: item.display_qty(qty_base),
                name: item.name,
                uom: uom.to_string(),
                qty_base,
                value_cents: value.cents(),
            });
        }

        Ok(Valuation {
            items: rows,
            total_value_cents: total.cents(),
        })
    }

    /// Newest-first movement history with human quantities.
    pub async fn movement_history(
        &self,
        item_id: i64,
        limit: u32,
        include_base: bool,
    ) -> DbResult<Vec<MovementView>> {
        let item = item::fetch(&self.pool, item_id).await?;
        let (uom, _) = item.basis_unit();
        let movements = movement::list_for_item(&self.pool, item_id, limit).await?;

        Ok(movements
            .into_iter()
            .map(|m| MovementView {
                id: m.id,
                batch_id: m.batch_id,
                quantity_decimal: item.display_qty(m.qty_change),
                uom: uom.to_string(),
                qty_base: include_base.then_some(m.qty_change),
                unit_cost_cents: m.unit_cost_cents,
                source_kind: m.source_kind,
                source_id: m.source_id,
                created_at: m.created_at,
            })
            .collect())
    }

    /// Cost of the oldest open batch, if any stock is on hand.
    pub async fn fifo_unit_cost(&self, item_id: i64) -> DbResult<Option<i64>> {
        let open = batch::list_open(&self.pool, item_id).await?;
        Ok(open.first().map(|b| b.unit_cost_cents))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::pool::{Database, DbConfig};
    use crate::repository::cash;

    #[tokio::test]
    async fn test_fifo_takes_oldest_first() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let b1 = fixtures::stock(&db, paper.id, "4", 10).await;
        let b2 = fixtures::stock(&db, paper.id, "4", 20).await;
        let b3 = fixtures::stock(&db, paper.id, "4", 30).await;

        let movements = db
            .ledger()
            .consume_fifo(paper.id, 6000, SourceKind::Other, None)
            .await
            .unwrap();

        let taken: Vec<(Option<i64>, i64, Option<i64>)> = movements
            .iter()
            .map(|m| (m.batch_id, m.qty_change, m.unit_cost_cents))
            .collect();
        assert_eq!(
            taken,
            vec![(Some(b1), -4000, Some(10)), (Some(b2), -2000, Some(20))]
        );

        let batches = db.ledger().batches(paper.id).await.unwrap();
        let remaining: Vec<(i64, i64)> = batches.iter().map(|b| (b.id, b.qty_remaining)).collect();
        assert_eq!(remaining, vec![(b1, 0), (b2, 2000), (b3, 4000)]);

        assert_eq!(db.ledger().on_hand_qty(paper.id).await.unwrap(), 6000);
        assert_eq!(db.items().get(paper.id).await.unwrap().qty_stored, 6000);
        assert_eq!(db.ledger().fifo_unit_cost(paper.id).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn test_oversell_writes_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        fixtures::stock(&db, paper.id, "4", 10).await;
        fixtures::stock(&db, paper.id, "4", 20).await;

        let movements_before = movement::count(db.pool()).await.unwrap();
        let batches_before = db.ledger().batches(paper.id).await.unwrap();

        let err = db
            .ledger()
            .consume_fifo(paper.id, 9000, SourceKind::Loss, None)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "insufficient_stock");
        assert_eq!(err.shortages().unwrap(), &[Shortage::new(paper.id, 9000, 8000)]);
        assert_eq!(movement::count(db.pool()).await.unwrap(), movements_before);
        assert_eq!(db.ledger().batches(paper.id).await.unwrap(), batches_before);
        assert_eq!(db.items().get(paper.id).await.unwrap().qty_stored, 8000);
    }

    #[tokio::test]
    async fn test_add_batch_validation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let ledger = db.ledger();

        let err = ledger
            .add_batch(paper.id, 0, 10, SourceKind::StockIn, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "must_be_positive");

        let err = ledger
            .add_batch(paper.id, 1000, -1, SourceKind::StockIn, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_unit_cost");

        let err = ledger
            .add_batch(paper.id, 1000, 1, SourceKind::Sold, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_allowed");

        let err = ledger
            .add_batch(999, 1000, 1, SourceKind::StockIn, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "item_not_found");

        assert_eq!(batch::count(db.pool()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stock_in_normalizes_quantity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let flour = fixtures::item(&db, "Flour", kiln_core::Dimension::Weight, "kg").await;

        let batch_id = db
            .ledger()
            .stock_in(flour.id, "1.25", "kg", 300, Some("po-7".into()))
            .await
            .unwrap();

        let batches = db.ledger().batches(flour.id).await.unwrap();
        assert_eq!(batches[0].id, batch_id);
        assert_eq!(batches[0].qty_initial, 1_250_000);
        assert_eq!(batches[0].source_kind, SourceKind::StockIn);
        assert_eq!(batches[0].source_id.as_deref(), Some("po-7"));

        let err = db
            .ledger()
            .stock_in(flour.id, "0.0000001", "kg", 300, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "fractional_base_quantity_not_allowed");
    }

    #[tokio::test]
    async fn test_purchase_is_one_unit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let glue = fixtures::count_item(&db, "Glue").await;

        let receipt = db
            .ledger()
            .purchase(
                vec![
                    PurchaseLine {
                        item_id: paper.id,
                        quantity_decimal: "10".into(),
                        uom: "ea".into(),
                        unit_cost_cents: 5,
                    },
                    PurchaseLine {
                        item_id: glue.id,
                        quantity_decimal: "2".into(),
                        uom: "ea".into(),
                        unit_cost_cents: 150,
                    },
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(receipt.batch_ids.len(), 2);
        let glue_batches = db.ledger().batches(glue.id).await.unwrap();
        assert_eq!(glue_batches[0].source_kind, SourceKind::Purchase);
        assert_eq!(glue_batches[0].source_id.as_deref(), Some(receipt.source_id.as_str()));

        // A bad line anywhere rejects the whole purchase
        let err = db
            .ledger()
            .purchase(
                vec![
                    PurchaseLine {
                        item_id: paper.id,
                        quantity_decimal: "1".into(),
                        uom: "ea".into(),
                        unit_cost_cents: 5,
                    },
                    PurchaseLine {
                        item_id: glue.id,
                        quantity_decimal: "1".into(),
                        uom: "ea".into(),
                        unit_cost_cents: -5,
                    },
                ],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_unit_cost");
        assert_eq!(db.ledger().on_hand_qty(paper.id).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_stock_out_reasons() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cup = fixtures::count_item(&db, "Cup").await;
        fixtures::stock(&db, cup.id, "5", 100).await;

        let lost = db
            .ledger()
            .stock_out(StockOutRequest {
                item_id: cup.id,
                quantity_decimal: "1".into(),
                uom: "ea".into(),
                reason: StockOutReason::Theft,
                record_cash_event: false,
                unit_price_cents: None,
                notes: None,
            })
            .await
            .unwrap();
        assert!(lost.cash_event.is_none());
        assert_eq!(lost.movements[0].source_kind, SourceKind::Theft);
        assert_eq!(cash::count(db.pool()).await.unwrap(), 0);

        let sold = db
            .ledger()
            .stock_out(StockOutRequest {
                item_id: cup.id,
                quantity_decimal: "2".into(),
                uom: "ea".into(),
                reason: StockOutReason::Sold,
                record_cash_event: true,
                unit_price_cents: Some(250),
                notes: None,
            })
            .await
            .unwrap();
        let event = sold.cash_event.unwrap();
        assert_eq!(event.amount_cents, 500);
        assert_eq!(event.source_id.as_deref(), Some(sold.source_id.as_str()));
        assert_eq!(db.ledger().on_hand_qty(cup.id).await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_adjust_both_directions() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cup = fixtures::count_item(&db, "Cup").await;
        fixtures::stock(&db, cup.id, "1", 100).await;

        let up = db.ledger().adjust(cup.id, 2000, Some("found in back")).await.unwrap();
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].qty_change, 2000);
        assert_eq!(up[0].unit_cost_cents, Some(0));
        assert_eq!(up[0].source_kind, SourceKind::Adjustment);

        let down = db.ledger().adjust(cup.id, -1500, None).await.unwrap();
        let taken: Vec<i64> = down.iter().map(|m| m.qty_change).collect();
        assert_eq!(taken, vec![-1000, -500]);

        let err = db.ledger().adjust(cup.id, 0, None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");
        assert_eq!(db.ledger().on_hand_qty(cup.id).await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn test_valuation_and_history() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let glue = fixtures::count_item(&db, "Glue").await;
        fixtures::stock(&db, paper.id, "4", 10).await;
        fixtures::stock(&db, paper.id, "4", 20).await;
        fixtures::stock(&db, glue.id, "1.5", 100).await;
        db.ledger()
            .consume_fifo(paper.id, 6000, SourceKind::Other, None)
            .await
            .unwrap();

        let paper_only = db.ledger().valuation(Some(paper.id)).await.unwrap();
        assert_eq!(paper_only.items.len(), 1);
        assert_eq!(paper_only.items[0].qty_base, 2000);
        assert_eq!(paper_only.items[0].quantity_decimal, "2");
        assert_eq!(paper_only.total_value_cents, 40);

        let all = db.ledger().valuation(None).await.unwrap();
        assert_eq!(all.total_value_cents, 40 + 150);

        let history = db.ledger().movement_history(paper.id, 10, true).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].quantity_decimal, "-2");
        assert_eq!(history[0].qty_base, Some(-2000));
        assert_eq!(history[0].uom, "ea");

        let trimmed = db.ledger().movement_history(paper.id, 1, false).await.unwrap();
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].qty_base, None);
    }

    #[tokio::test]
    async fn test_batches_reject_tampering() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let batch_id = fixtures::stock(&db, paper.id, "4", 10).await;

        let raise = sqlx::query("UPDATE item_batches SET qty_remaining = 9000 WHERE id = ?")
            .bind(batch_id)
            .execute(db.pool())
            .await
            .map_err(crate::error::DbError::from)
            .unwrap_err();
        assert_eq!(raise.code(), "immutable");

        let reprice = sqlx::query("UPDATE item_batches SET unit_cost_cents = 1 WHERE id = ?")
            .bind(batch_id)
            .execute(db.pool())
            .await
            .map_err(crate::error::DbError::from)
            .unwrap_err();
        assert_eq!(reprice.code(), "immutable");

        let delete = sqlx::query("DELETE FROM item_movements")
            .execute(db.pool())
            .await
            .map_err(crate::error::DbError::from)
            .unwrap_err();
        assert_eq!(delete.code(), "immutable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_queue_instead_of_failing() {
        let (db, dir) = fixtures::file_db().await;
        let cup = fixtures::count_item(&db, "Cup").await;
        fixtures::stock(&db, cup.id, "100", 10).await;
        let cup_id = cup.id;

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let db = db.clone();
            tasks.spawn(async move {
                if i % 2 == 0 {
                    db.ledger()
                        .consume_fifo(cup_id, 1000, SourceKind::Loss, None)
                        .await
                } else {
                    db.ledger().adjust(cup_id, -1000, None).await
                }
            });
        }

        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            let movements = joined.unwrap().unwrap();
            assert_eq!(movements.len(), 1);
            completed += 1;
        }
        assert_eq!(completed, 20);

        assert_eq!(db.ledger().on_hand_qty(cup_id).await.unwrap(), 80_000);
        assert_eq!(db.items().get(cup_id).await.unwrap().qty_stored, 80_000);
        assert_eq!(movement::count(db.pool()).await.unwrap(), 21);

        db.close().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_read_only_ledger_refuses_writes() {
        let db = Database::new(DbConfig::in_memory().writes_enabled(false))
            .await
            .unwrap();
        let err = db
            .ledger()
            .add_batch(1, 1000, 10, SourceKind::StockIn, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "writes_disabled");
    }
}
