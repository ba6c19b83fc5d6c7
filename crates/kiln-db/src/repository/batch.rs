//! # Batch Rows
//!
//! Insert, lock, read and decrement `item_batches`.
//!
//! ## Lock Emulation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Postgres:  SELECT ... FROM item_batches WHERE ... FOR UPDATE           │
//! │                                                                         │
//! │  SQLite:    UPDATE item_batches SET qty_remaining = qty_remaining       │
//! │             WHERE item_id = ? AND qty_remaining > 0                     │
//! │             SELECT ... (same rows)                                      │
//! │                                                                         │
//! │  The no-op UPDATE takes the database write lock for the rest of the    │
//! │  transaction, so a concurrent consumer blocks until COMMIT/ROLLBACK    │
//! │  and then sees the decremented rows.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use kiln_core::{ItemBatch, SourceKind};

use crate::error::{DbError, DbResult};

const BATCH_COLUMNS: &str = "id, item_id, qty_initial, qty_remaining, unit_cost_cents, \
                             source_kind, source_id, is_oversold, created_at";

/// A batch about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub item_id: i64,
    pub qty_base: i64,
    pub unit_cost_cents: i64,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
}

/// Inserts a batch with `qty_initial = qty_remaining = qty_base`.
pub async fn insert(conn: &mut SqliteConnection, batch: &NewBatch, at: DateTime<Utc>) -> DbResult<i64> {
    let result = sqlx::query(
        "INSERT INTO item_batches \
         (item_id, qty_initial, qty_remaining, unit_cost_cents, source_kind, source_id, is_oversold, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(batch.item_id)
    .bind(batch.qty_base)
    .bind(batch.qty_base)
    .bind(batch.unit_cost_cents)
    .bind(batch.source_kind)
    .bind(batch.source_id.as_deref())
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Takes the write lock on the item's open batches.
pub async fn lock_open(conn: &mut SqliteConnection, item_id: i64) -> DbResult<()> {
    sqlx::query(
        "UPDATE item_batches SET qty_remaining = qty_remaining \
         WHERE item_id = ? AND qty_remaining > 0",
    )
    .bind(item_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Open batches, oldest first; `id` breaks timestamp ties.
pub async fn list_open<'e, E>(executor: E, item_id: i64) -> DbResult<Vec<ItemBatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM item_batches \
         WHERE item_id = ? AND qty_remaining > 0 \
         ORDER BY created_at ASC, id ASC"
    );
    Ok(sqlx::query_as::<_, ItemBatch>(&sql)
        .bind(item_id)
        .fetch_all(executor)
        .await?)
}

/// Every batch for an item, oldest first.
pub async fn list_for_item<'e, E>(executor: E, item_id: i64) -> DbResult<Vec<ItemBatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM item_batches WHERE item_id = ? ORDER BY created_at ASC, id ASC"
    );
    Ok(sqlx::query_as::<_, ItemBatch>(&sql)
        .bind(item_id)
        .fetch_all(executor)
        .await?)
}

/// Σ qty_remaining for an item.
pub async fn sum_remaining<'e, E>(executor: E, item_id: i64) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(qty_remaining), 0) FROM item_batches WHERE item_id = ?",
    )
    .bind(item_id)
    .fetch_one(executor)
    .await?;
    Ok(total)
}

/// Takes `qty` from a batch. Refuses to go below zero.
pub async fn decrement(conn: &mut SqliteConnection, batch_id: i64, qty: i64) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE item_batches SET qty_remaining = qty_remaining - ? \
         WHERE id = ? AND qty_remaining >= ?",
    )
    .bind(qty)
    .bind(batch_id)
    .bind(qty)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(DbError::TransactionFailed(format!(
            "batch {batch_id} could not give up {qty}"
        )));
    }
    Ok(())
}

/// Number of batch rows.
pub async fn count<'e, E>(executor: E) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM item_batches")
        .fetch_one(executor)
        .await?)
}
