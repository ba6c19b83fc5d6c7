//! Builders shared by the service tests.

use std::path::PathBuf;

use kiln_core::{Dimension, Item};
use uuid::Uuid;

use crate::pool::{Database, DbConfig};
use crate::repository::item::NewItem;
use crate::repository::recipe::{NewRecipe, NewRecipeComponent, RecipeWithItems};

/// A file-backed database in a fresh temp directory. Remove the directory
/// when done.
pub async fn file_db() -> (Database, PathBuf) {
    let dir = std::env::temp_dir().join(format!("kiln-test-{}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    let db = Database::new(DbConfig::new(dir.join("kiln.db"))).await.unwrap();
    (db, dir)
}

pub async fn item(db: &Database, name: &str, dimension: Dimension, uom: &str) -> Item {
    db.items()
        .create(NewItem::new(name, dimension).uom(uom))
        .await
        .unwrap()
}

pub async fn count_item(db: &Database, name: &str) -> Item {
    item(db, name, Dimension::Count, "ea").await
}

pub async fn priced_item(db: &Database, name: &str, price_cents: i64) -> Item {
    db.items()
        .create(NewItem::new(name, Dimension::Count).price_cents(price_cents))
        .await
        .unwrap()
}

/// Stocks `qty` ea at `unit_cost_cents` per ea. Returns the batch id.
pub async fn stock(db: &Database, item_id: i64, qty: &str, unit_cost_cents: i64) -> i64 {
    stock_uom(db, item_id, qty, "ea", unit_cost_cents).await
}

pub async fn stock_uom(
    db: &Database,
    item_id: i64,
    qty: &str,
    uom: &str,
    unit_cost_cents: i64,
) -> i64 {
    db.ledger()
        .stock_in(item_id, qty, uom, unit_cost_cents, None)
        .await
        .unwrap()
}

/// 3 ea of paper make 1 ea of plane.
pub async fn plane_recipe(db: &Database) -> RecipeWithItems {
    let paper = count_item(db, "Paper").await;
    let plane = count_item(db, "Plane").await;

    db.recipes()
        .create(NewRecipe {
            name: "Paper plane".into(),
            output_item_id: plane.id,
            quantity_decimal: "1".into(),
            uom: "ea".into(),
            notes: None,
            components: vec![NewRecipeComponent {
                item_id: paper.id,
                quantity_decimal: "3".into(),
                uom: "ea".into(),
                is_optional: false,
            }],
        })
        .await
        .unwrap()
}
