//! # Manufacturing Run Rows

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};

use kiln_core::{CoreError, ManufacturingRun, RunStatus};

use crate::error::{DbError, DbResult};

const RUN_COLUMNS: &str = "id, recipe_id, output_item_id, output_qty, status, notes, meta, \
                           created_at, executed_at";

/// A run row about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub recipe_id: Option<i64>,
    pub output_item_id: i64,
    pub output_qty: i64,
    pub status: RunStatus,
    pub notes: Option<String>,
    pub meta: Option<String>,
}

pub async fn insert(conn: &mut SqliteConnection, run: &NewRun, at: DateTime<Utc>) -> DbResult<i64> {
    let result = sqlx::query(
        "INSERT INTO manufacturing_runs \
         (recipe_id, output_item_id, output_qty, status, notes, meta, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(run.recipe_id)
    .bind(run.output_item_id)
    .bind(run.output_qty)
    .bind(run.status)
    .bind(run.notes.as_deref())
    .bind(run.meta.as_deref())
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// `created` → `completed`, stamping `executed_at` and the meta blob.
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    run_id: i64,
    meta: &str,
    executed_at: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE manufacturing_runs SET status = ?, meta = ?, executed_at = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(RunStatus::Completed)
    .bind(meta)
    .bind(executed_at)
    .bind(run_id)
    .bind(RunStatus::Created)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(DbError::TransactionFailed(format!(
            "run {run_id} is not in status created"
        )));
    }
    Ok(())
}

/// Loads one run, mapping a missing row to `RunNotFound`.
pub async fn fetch<'e, E>(executor: E, id: i64) -> DbResult<ManufacturingRun>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {RUN_COLUMNS} FROM manufacturing_runs WHERE id = ?");
    sqlx::query_as::<_, ManufacturingRun>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| CoreError::RunNotFound(id).into())
}

/// `(output_item_id, Σ output_qty, runs)` for completed runs executed in
/// `[from, to)`.
pub async fn produced_between<'e, E>(
    executor: E,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> DbResult<Vec<(i64, i64, i64)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_as(
        "SELECT output_item_id, SUM(output_qty), COUNT(*) FROM manufacturing_runs \
         WHERE status = 'completed' AND executed_at >= ? AND executed_at < ? \
         GROUP BY output_item_id ORDER BY output_item_id",
    )
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await?)
}

/// Runs, newest first.
pub async fn list<'e, E>(executor: E, limit: u32) -> DbResult<Vec<ManufacturingRun>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM manufacturing_runs ORDER BY created_at DESC, id DESC LIMIT ?"
    );
    Ok(sqlx::query_as::<_, ManufacturingRun>(&sql)
        .bind(limit)
        .fetch_all(executor)
        .await?)
}
