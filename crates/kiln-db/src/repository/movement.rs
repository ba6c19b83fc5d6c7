//! # Movement Rows
//!
//! `item_movements` is append-only; this module only inserts and reads.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use kiln_core::{ItemMovement, SourceKind};

use crate::error::DbResult;

const MOVEMENT_COLUMNS: &str = "id, item_id, batch_id, qty_change, unit_cost_cents, \
                                source_kind, source_id, is_oversold, created_at";

/// A movement about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub item_id: i64,
    pub batch_id: Option<i64>,
    pub qty_change: i64,
    pub unit_cost_cents: Option<i64>,
    pub source_kind: SourceKind,
    pub source_id: Option<String>,
}

/// Appends a movement and returns the stored row.
pub async fn insert(
    conn: &mut SqliteConnection,
    movement: NewMovement,
    at: DateTime<Utc>,
) -> DbResult<ItemMovement> {
    let result = sqlx::query(
        "INSERT INTO item_movements \
         (item_id, batch_id, qty_change, unit_cost_cents, source_kind, source_id, is_oversold, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(movement.item_id)
    .bind(movement.batch_id)
    .bind(movement.qty_change)
    .bind(movement.unit_cost_cents)
    .bind(movement.source_kind)
    .bind(movement.source_id.as_deref())
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(ItemMovement {
        id: result.last_insert_rowid(),
        item_id: movement.item_id,
        batch_id: movement.batch_id,
        qty_change: movement.qty_change,
        unit_cost_cents: movement.unit_cost_cents,
        source_kind: movement.source_kind,
        source_id: movement.source_id,
        is_oversold: false,
        created_at: at,
    })
}

/// Movements sharing a correlation id, in insertion order.
pub async fn list_for_source<'e, E>(executor: E, source_id: &str) -> DbResult<Vec<ItemMovement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM item_movements WHERE source_id = ? ORDER BY id ASC"
    );
    Ok(sqlx::query_as::<_, ItemMovement>(&sql)
        .bind(source_id)
        .fetch_all(executor)
        .await?)
}

/// An item's movements, newest first.
pub async fn list_for_item<'e, E>(executor: E, item_id: i64, limit: u32) -> DbResult<Vec<ItemMovement>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {MOVEMENT_COLUMNS} FROM item_movements WHERE item_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT ?"
    );
    Ok(sqlx::query_as::<_, ItemMovement>(&sql)
        .bind(item_id)
        .bind(limit)
        .fetch_all(executor)
        .await?)
}

pub async fn count<'e, E>(executor: E) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM item_movements")
        .fetch_one(executor)
        .await?)
}
