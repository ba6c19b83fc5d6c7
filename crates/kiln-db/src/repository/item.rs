//! # Item Repository
//!
//! Database operations for items.
//!
//! `qty_stored` is a cache. It is bumped by the ledger inside the same
//! transaction as every batch change, but on-hand answers always come from
//! `item_batches`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use kiln_core::validation::{validate_name, validate_price_cents};
use kiln_core::{CoreError, Dimension, Item, ValidationError};

use crate::error::DbResult;
use crate::pool::LedgerSettings;

const ITEM_COLUMNS: &str = "id, name, dimension, uom, price_cents, is_product, qty_stored, created_at";

/// Input for [`ItemRepository::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub dimension: Dimension,
    /// Defaults to the dimension's default unit.
    pub uom: Option<String>,
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub is_product: bool,
}

impl NewItem {
    pub fn new(name: impl Into<String>, dimension: Dimension) -> Self {
        NewItem {
            name: name.into(),
            dimension,
            uom: None,
            price_cents: None,
            is_product: false,
        }
    }

    pub fn uom(mut self, uom: impl Into<String>) -> Self {
        self.uom = Some(uom.into());
        self
    }

    pub fn price_cents(mut self, cents: i64) -> Self {
        self.price_cents = Some(cents);
        self
    }

    pub fn product(mut self) -> Self {
        self.is_product = true;
        self
    }
}

/// Repository for item database operations.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl ItemRepository {
    /// Creates a new ItemRepository.
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        ItemRepository { pool, settings }
    }

    /// Creates an item after validating its name, unit and price.
    ///
    /// The stored unit is the canonical lowercase spelling.
    pub async fn create(&self, new: NewItem) -> DbResult<Item> {
        self.settings.ensure_writable()?;

        let name = validate_name("name", &new.name)?;
        let uom = match new.uom.as_deref() {
            Some(uom) => new
                .dimension
                .lookup(uom)
                .map(|(canonical, _)| canonical)
                .ok_or_else(|| ValidationError::UnsupportedUom {
                    dimension: new.dimension,
                    uom: uom.to_string(),
                })?,
            None => new.dimension.default_unit().0,
        };
        if let Some(price) = new.price_cents {
            validate_price_cents("price_cents", price)?;
        }

        let result = sqlx::query(
            "INSERT INTO items (name, dimension, uom, price_cents, is_product, qty_stored, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&name)
        .bind(new.dimension)
        .bind(uom)
        .bind(new.price_cents)
        .bind(new.is_product)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(item_id = id, name = %name, dimension = %new.dimension, "Item created");

        fetch(&self.pool, id).await
    }

    /// Gets an item by id, failing with `ItemNotFound`.
    pub async fn get(&self, id: i64) -> DbResult<Item> {
        fetch(&self.pool, id).await
    }

    /// Lists all items by name.
    pub async fn list(&self) -> DbResult<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY name, id");
        let items = sqlx::query_as::<_, Item>(&sql).fetch_all(&self.pool).await?;

        debug!(count = items.len(), "Listed items");
        Ok(items)
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

/// Loads one item, mapping a missing row to `ItemNotFound`.
pub async fn fetch<'e, E>(executor: E, id: i64) -> DbResult<Item>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
    sqlx::query_as::<_, Item>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| CoreError::ItemNotFound(id).into())
}

/// Adds `delta` to the cached on-hand quantity.
pub async fn bump_qty_stored(conn: &mut SqliteConnection, item_id: i64, delta: i64) -> DbResult<()> {
    sqlx::query("UPDATE items SET qty_stored = qty_stored + ? WHERE id = ?")
        .bind(delta)
        .bind(item_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_create_normalizes_unit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let item = db
            .items()
            .create(NewItem::new("  Flour ", Dimension::Weight).uom(" KG "))
            .await
            .unwrap();

        assert_eq!(item.name, "Flour");
        assert_eq!(item.uom, "kg");
        assert_eq!(item.qty_stored, 0);
        assert_eq!(db.items().get(item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn test_create_defaults_unit_and_rejects_bad_ones() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let item = db
            .items()
            .create(NewItem::new("Thread", Dimension::Length))
            .await
            .unwrap();
        assert_eq!(item.uom, "m");

        let err = db
            .items()
            .create(NewItem::new("Thread", Dimension::Length).uom("kg"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_uom");

        let err = db
            .items()
            .create(NewItem::new("Cup", Dimension::Count).price_cents(-1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_format");
    }

    #[tokio::test]
    async fn test_get_missing_item() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.items().get(404).await.unwrap_err();
        assert_eq!(err.code(), "item_not_found");
    }

    #[tokio::test]
    async fn test_create_refused_when_read_only() {
        let db = Database::new(DbConfig::in_memory().writes_enabled(false))
            .await
            .unwrap();
        let err = db
            .items()
            .create(NewItem::new("Cup", Dimension::Count))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "writes_disabled");
        assert!(db.items().list().await.unwrap().is_empty());
    }
}
