//! # Unit of Work
//!
//! The one place the ledger opens, commits and rolls back transactions.
//!
//! ```text
//! run_in_transaction(pool, |conn| Box::pin(async move { ... }))
//!        │
//!        ├── BEGIN IMMEDIATE      (write lock up front, waits on busy_timeout)
//!        ├── work(conn).await
//!        │      ├── Ok(value) ──► COMMIT ──► Ok(value)
//!        │      └── Err(e)    ──► ROLLBACK ──► Err(e)
//! ```
//!
//! `BEGIN IMMEDIATE` takes SQLite's write lock before the first read, so two
//! units of work on the same item queue on the busy timeout instead of
//! failing to upgrade a read transaction.
//!
//! Every write inside `work` must go through `conn`. With a single
//! connection pool, touching the pool from inside the closure would wait on
//! the connection the transaction already holds.

use std::future::Future;
use std::pin::Pin;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Boxed future returned by a unit of work, borrowing the connection.
pub type UnitFuture<'c, T> = Pin<Box<dyn Future<Output = DbResult<T>> + Send + 'c>>;

/// Runs `work` inside one transaction.
///
/// Commits when `work` returns `Ok`; rolls back and returns the error
/// otherwise. A failed rollback is logged; the original error still wins.
///
/// ## Example
/// ```rust,ignore
/// let batch_id = run_in_transaction(&pool, move |conn| {
///     Box::pin(async move { add_batch_in(conn, &new_batch).await })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<T, F>(pool: &SqlitePool, work: F) -> DbResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> UnitFuture<'c, T> + Send,
{
    let mut tx = pool
        .begin_with("BEGIN IMMEDIATE")
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            debug!(error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn count_items(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn insert_item(conn: &mut SqliteConnection) -> UnitFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO items (name, dimension, uom, created_at) \
                 VALUES ('Glue', 'count', 'ea', '2026-01-01T00:00:00+00:00')",
            )
            .execute(&mut *conn)
            .await?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_commit_on_ok() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let value = run_in_transaction(db.pool(), |conn| {
            Box::pin(async move {
                insert_item(conn).await?;
                Ok(7)
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(count_items(db.pool()).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_err() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let result: DbResult<()> = run_in_transaction(db.pool(), |conn| {
            Box::pin(async move {
                insert_item(conn).await?;
                Err(DbError::Internal("boom".into()))
            })
        })
        .await;

        assert!(matches!(result, Err(DbError::Internal(_))));
        assert_eq!(count_items(db.pool()).await, 0);
    }
}
