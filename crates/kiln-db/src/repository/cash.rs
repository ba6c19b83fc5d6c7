//! # Cash Event Rows
//!
//! `cash_events` is append-only. Amounts are stored signed: sales positive,
//! refunds and expenses negative.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use kiln_core::{CashEvent, CashEventKind, SourceKind};

use crate::error::{DbError, DbResult};

const CASH_COLUMNS: &str = "id, kind, category, amount_cents, item_id, qty_base, unit_price_cents, \
                            source_kind, source_id, related_source_id, notes, created_at";

/// A cash event about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCashEvent {
    pub kind: CashEventKind,
    pub category: Option<String>,
    pub amount_cents: i64,
    pub item_id: Option<i64>,
    pub qty_base: Option<i64>,
    pub unit_price_cents: Option<i64>,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
    pub related_source_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Appends an event and returns the stored row.
pub async fn insert(conn: &mut SqliteConnection, event: NewCashEvent) -> DbResult<CashEvent> {
    let result = sqlx::query(
        "INSERT INTO cash_events \
         (kind, category, amount_cents, item_id, qty_base, unit_price_cents, \
          source_kind, source_id, related_source_id, notes, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.kind)
    .bind(event.category.as_deref())
    .bind(event.amount_cents)
    .bind(event.item_id)
    .bind(event.qty_base)
    .bind(event.unit_price_cents)
    .bind(event.source_kind)
    .bind(event.source_id.as_deref())
    .bind(event.related_source_id.as_deref())
    .bind(event.notes.as_deref())
    .bind(event.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(CashEvent {
        id: result.last_insert_rowid(),
        kind: event.kind,
        category: event.category,
        amount_cents: event.amount_cents,
        item_id: event.item_id,
        qty_base: event.qty_base,
        unit_price_cents: event.unit_price_cents,
        source_kind: event.source_kind,
        source_id: event.source_id,
        related_source_id: event.related_source_id,
        notes: event.notes,
        created_at: event.created_at,
    })
}

pub async fn fetch<'e, E>(executor: E, id: i64) -> DbResult<CashEvent>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {CASH_COLUMNS} FROM cash_events WHERE id = ?");
    sqlx::query_as::<_, CashEvent>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| DbError::not_found("CashEvent", id))
}

/// Events with `from <= created_at < to`, oldest first.
pub async fn list_between<'e, E>(
    executor: E,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> DbResult<Vec<CashEvent>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {CASH_COLUMNS} FROM cash_events \
         WHERE created_at >= ? AND created_at < ? ORDER BY created_at ASC, id ASC"
    );
    Ok(sqlx::query_as::<_, CashEvent>(&sql)
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?)
}

pub async fn count<'e, E>(executor: E) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM cash_events")
        .fetch_one(executor)
        .await?)
}
