//! # Integrity Validator
//!
//! Read-only scans over the batch and cash ledgers. Nothing here writes or
//! repairs; findings are handed to an operator.
//!
//! ## Checks
//! ```text
//! ┌──────────────────────────────────────────┬──────────────────────────────┐
//! │ code                                     │ row reported                 │
//! ├──────────────────────────────────────────┼──────────────────────────────┤
//! │ batch_negative_qty_remaining             │ batch                        │
//! │ movement_references_missing_batch        │ movement                     │
//! │ negative_movement_null_unit_cost         │ movement                     │
//! │ batch_negative_aggregate_cost            │ batch                        │
//! │ sale_missing_negative_movements          │ cash event                   │
//! │ sale_linked_non_negative_movement        │ movement                     │
//! │ sale_cogs_exceeds_sale_amount            │ cash event                   │
//! │ refund_linked_negative_movement_not_cogs │ movement                     │
//! └──────────────────────────────────────────┴──────────────────────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use kiln_core::money::Money;

use crate::error::DbResult;
use crate::repository::item;

/// Which check produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BatchNegativeQtyRemaining,
    MovementReferencesMissingBatch,
    NegativeMovementNullUnitCost,
    BatchNegativeAggregateCost,
    SaleMissingNegativeMovements,
    SaleLinkedNonNegativeMovement,
    SaleCogsExceedsSaleAmount,
    RefundLinkedNegativeMovementNotCogs,
}

impl IssueKind {
    pub const fn code(self) -> &'static str {
        match self {
            IssueKind::BatchNegativeQtyRemaining => "batch_negative_qty_remaining",
            IssueKind::MovementReferencesMissingBatch => "movement_references_missing_batch",
            IssueKind::NegativeMovementNullUnitCost => "negative_movement_null_unit_cost",
            IssueKind::BatchNegativeAggregateCost => "batch_negative_aggregate_cost",
            IssueKind::SaleMissingNegativeMovements => "sale_missing_negative_movements",
            IssueKind::SaleLinkedNonNegativeMovement => "sale_linked_non_negative_movement",
            IssueKind::SaleCogsExceedsSaleAmount => "sale_cogs_exceeds_sale_amount",
            IssueKind::RefundLinkedNegativeMovementNotCogs => {
                "refund_linked_negative_movement_not_cogs"
            }
        }
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub kind: IssueKind,
    /// Id of the offending row (batch, movement or cash event, per `kind`).
    pub row_id: i64,
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues of one kind.
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityValidator {
    pool: SqlitePool,
}

impl IntegrityValidator {
    pub fn new(pool: SqlitePool) -> Self {
        IntegrityValidator { pool }
    }

    /// Runs every check.
    pub async fn run(&self) -> DbResult<IntegrityReport> {
        let mut issues = Vec::new();

        issues.extend(self.negative_remaining().await?);
        issues.extend(self.orphaned_movements().await?);
        issues.extend(self.uncosted_consumption().await?);
        issues.extend(self.negative_aggregate_cost().await?);
        issues.extend(self.sales_without_consumption().await?);
        issues.extend(self.sales_with_inbound_movements().await?);
        issues.extend(self.sales_below_cost().await?);
        issues.extend(self.refunds_with_consumption().await?);

        if issues.is_empty() {
            info!("Integrity check passed");
        } else {
            warn!(issues = issues.len(), "Integrity check found issues");
        }

        Ok(IntegrityReport {
            checked_at: Utc::now(),
            issues,
        })
    }

    async fn negative_remaining(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, item_id, qty_remaining FROM item_batches WHERE qty_remaining < 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, item_id, qty_remaining)| IntegrityIssue {
                kind: IssueKind::BatchNegativeQtyRemaining,
                row_id: id,
                detail: json!({ "item_id": item_id, "qty_remaining": qty_remaining }),
            })
            .collect())
    }

    async fn orphaned_movements(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT m.id, m.batch_id FROM item_movements m \
             LEFT JOIN item_batches b ON b.id = m.batch_id \
             WHERE m.batch_id IS NOT NULL AND b.id IS NULL ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, batch_id)| IntegrityIssue {
                kind: IssueKind::MovementReferencesMissingBatch,
                row_id: id,
                detail: json!({ "batch_id": batch_id }),
            })
            .collect())
    }

    async fn uncosted_consumption(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, item_id, qty_change FROM item_movements \
             WHERE qty_change < 0 AND unit_cost_cents IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, item_id, qty_change)| IntegrityIssue {
                kind: IssueKind::NegativeMovementNullUnitCost,
                row_id: id,
                detail: json!({ "item_id": item_id, "qty_change": qty_change }),
            })
            .collect())
    }

    async fn negative_aggregate_cost(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, qty_initial, unit_cost_cents FROM item_batches \
             WHERE qty_initial * unit_cost_cents < 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, qty_initial, unit_cost_cents)| IntegrityIssue {
                kind: IssueKind::BatchNegativeAggregateCost,
                row_id: id,
                detail: json!({ "qty_initial": qty_initial, "unit_cost_cents": unit_cost_cents }),
            })
            .collect())
    }

    async fn sales_without_consumption(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT c.id, c.source_id FROM cash_events c \
             WHERE c.kind = 'sale' AND NOT EXISTS ( \
                 SELECT 1 FROM item_movements m \
                 WHERE m.source_id = c.source_id AND m.qty_change < 0 \
             ) ORDER BY c.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, source_id)| IntegrityIssue {
                kind: IssueKind::SaleMissingNegativeMovements,
                row_id: id,
                detail: json!({ "source_id": source_id }),
            })
            .collect())
    }

    async fn sales_with_inbound_movements(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT m.id, c.id, m.qty_change FROM cash_events c \
             JOIN item_movements m ON m.source_id = c.source_id \
             WHERE c.kind = 'sale' AND m.qty_change >= 0 ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, cash_event_id, qty_change)| IntegrityIssue {
                kind: IssueKind::SaleLinkedNonNegativeMovement,
                row_id: id,
                detail: json!({ "cash_event_id": cash_event_id, "qty_change": qty_change }),
            })
            .collect())
    }

    async fn sales_below_cost(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64, i64, Option<i64>)> = sqlx::query_as(
            "SELECT c.id, c.amount_cents, m.item_id, m.qty_change, m.unit_cost_cents \
             FROM cash_events c \
             JOIN item_movements m ON m.source_id = c.source_id \
             WHERE c.kind = 'sale' AND m.qty_change < 0 ORDER BY c.id, m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut multipliers: HashMap<i64, i64> = HashMap::new();
        let mut sales: Vec<(i64, i64, Money)> = Vec::new();
        for (cash_event_id, amount_cents, item_id, qty_change, unit_cost_cents) in rows {
            let multiplier = match multipliers.get(&item_id) {
                Some(m) => *m,
                None => {
                    let m = item::fetch(&self.pool, item_id).await?.basis_unit().1;
                    multipliers.insert(item_id, m);
                    m
                }
            };
            let line = Money::line_total(unit_cost_cents.unwrap_or(0), -qty_change, multiplier);
            match sales.last_mut() {
                Some((id, _, cogs)) if *id == cash_event_id => *cogs += line,
                _ => sales.push((cash_event_id, amount_cents, line)),
            }
        }

        Ok(sales
            .into_iter()
            .filter(|(_, amount_cents, cogs)| cogs.cents() > *amount_cents)
            .map(|(id, amount_cents, cogs)| IntegrityIssue {
                kind: IssueKind::SaleCogsExceedsSaleAmount,
                row_id: id,
                detail: json!({ "amount_cents": amount_cents, "cogs_cents": cogs.cents() }),
            })
            .collect())
    }

    async fn refunds_with_consumption(&self) -> DbResult<Vec<IntegrityIssue>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT m.id, c.id, m.qty_change FROM cash_events c \
             JOIN item_movements m ON m.source_id = c.source_id \
             WHERE c.kind = 'refund' AND m.qty_change < 0 ORDER BY m.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, cash_event_id, qty_change)| IntegrityIssue {
                kind: IssueKind::RefundLinkedNegativeMovementNotCogs,
                row_id: id,
                detail: json!({ "cash_event_id": cash_event_id, "qty_change": qty_change }),
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::{RefundRequest, RestockRequest, SaleRequest};
    use crate::fixtures;
    use crate::pool::{Database, DbConfig};
    use crate::repository::batch::{self, NewBatch};
    use crate::repository::cash::{self, NewCashEvent};
    use crate::repository::movement::{self, NewMovement};
    use kiln_core::{CashEventKind, SourceKind};

    fn kinds(report: &IntegrityReport) -> Vec<IssueKind> {
        report.issues.iter().map(|issue| issue.kind).collect()
    }

    fn sale(item_id: i64, price: i64) -> SaleRequest {
        SaleRequest {
            item_id,
            quantity_decimal: "1".into(),
            uom: "ea".into(),
            unit_price_cents: Some(price),
            notes: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_normal_activity_is_clean() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recipe = fixtures::plane_recipe(&db).await;
        let paper_id = recipe.items[0].item_id;
        let plane_id = recipe.recipe.output_item_id;
        fixtures::stock(&db, paper_id, "6", 10).await;

        db.manufacturing()
            .run(&kiln_core::manufacturing::RunRequest::Recipe {
                recipe_id: recipe.recipe.id,
                quantity_decimal: "2".into(),
                uom: "ea".into(),
                notes: None,
            })
            .await
            .unwrap();
        let sold = db.finance().record_sale(sale(plane_id, 100)).await.unwrap();
        db.finance()
            .record_refund(RefundRequest {
                amount_cents: 100,
                related_source_id: Some(sold.source_id),
                restock: Some(RestockRequest::new(plane_id, "1", "ea")),
                category: None,
                notes: None,
                created_at: None,
            })
            .await
            .unwrap();

        let report = db.integrity().run().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
    }

    #[tokio::test]
    async fn test_sale_below_cost_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cup = fixtures::count_item(&db, "Cup").await;
        fixtures::stock(&db, cup.id, "1", 100).await;
        let sold = db.finance().record_sale(sale(cup.id, 60)).await.unwrap();

        let report = db.integrity().run().await.unwrap();
        assert_eq!(kinds(&report), vec![IssueKind::SaleCogsExceedsSaleAmount]);
        assert_eq!(report.issues[0].row_id, sold.cash_event.id);
        assert_eq!(report.issues[0].detail["cogs_cents"], 100);
    }

    #[tokio::test]
    async fn test_tampered_rows_reported() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cup = fixtures::count_item(&db, "Cup").await;
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let bad_batch = batch::insert(
            &mut conn,
            &NewBatch {
                item_id: cup.id,
                qty_base: -5,
                unit_cost_cents: 10,
                source_kind: SourceKind::StockIn,
                source_id: None,
            },
            now,
        )
        .await
        .unwrap();
        let orphan = movement::insert(
            &mut conn,
            NewMovement {
                item_id: cup.id,
                batch_id: Some(9999),
                qty_change: 1000,
                unit_cost_cents: Some(10),
                source_kind: SourceKind::StockIn,
                source_id: None,
            },
            now,
        )
        .await
        .unwrap();
        let uncosted = movement::insert(
            &mut conn,
            NewMovement {
                item_id: cup.id,
                batch_id: None,
                qty_change: -1000,
                unit_cost_cents: None,
                source_kind: SourceKind::Loss,
                source_id: None,
            },
            now,
        )
        .await
        .unwrap();
        let ghost_sale = cash::insert(
            &mut conn,
            NewCashEvent {
                kind: CashEventKind::Sale,
                category: None,
                amount_cents: 100,
                item_id: Some(cup.id),
                qty_base: Some(1000),
                unit_price_cents: Some(100),
                source_kind: SourceKind::Sold,
                source_id: Some("ghost".into()),
                related_source_id: None,
                notes: None,
                created_at: now,
            },
        )
        .await
        .unwrap();
        cash::insert(
            &mut conn,
            NewCashEvent {
                kind: CashEventKind::Refund,
                category: None,
                amount_cents: -100,
                item_id: None,
                qty_base: None,
                unit_price_cents: None,
                source_kind: SourceKind::Refund,
                source_id: Some("refund-1".into()),
                related_source_id: None,
                notes: None,
                created_at: now,
            },
        )
        .await
        .unwrap();
        let refund_cogs = movement::insert(
            &mut conn,
            NewMovement {
                item_id: cup.id,
                batch_id: None,
                qty_change: -1000,
                unit_cost_cents: Some(10),
                source_kind: SourceKind::Refund,
                source_id: Some("refund-1".into()),
            },
            now,
        )
        .await
        .unwrap();
        let inbound_on_sale = movement::insert(
            &mut conn,
            NewMovement {
                item_id: cup.id,
                batch_id: None,
                qty_change: 1000,
                unit_cost_cents: Some(10),
                source_kind: SourceKind::Sold,
                source_id: Some("ghost".into()),
            },
            now,
        )
        .await
        .unwrap();
        drop(conn);

        let report = db.integrity().run().await.unwrap();
        let found = |kind| -> Vec<i64> { report.of_kind(kind).map(|i| i.row_id).collect() };

        assert_eq!(found(IssueKind::BatchNegativeQtyRemaining), vec![bad_batch]);
        assert_eq!(found(IssueKind::BatchNegativeAggregateCost), vec![bad_batch]);
        assert_eq!(found(IssueKind::MovementReferencesMissingBatch), vec![orphan.id]);
        assert_eq!(found(IssueKind::NegativeMovementNullUnitCost), vec![uncosted.id]);
        assert_eq!(found(IssueKind::SaleMissingNegativeMovements), vec![ghost_sale.id]);
        assert_eq!(
            found(IssueKind::SaleLinkedNonNegativeMovement),
            vec![inbound_on_sale.id]
        );
        assert_eq!(
            found(IssueKind::RefundLinkedNegativeMovementNotCogs),
            vec![refund_cogs.id]
        );
        assert!(found(IssueKind::SaleCogsExceedsSaleAmount).is_empty());
        assert_eq!(
            serde_json::to_value(IssueKind::SaleMissingNegativeMovements).unwrap(),
            IssueKind::SaleMissingNegativeMovements.code()
        );
    }
}
