//! # Recipe Repository
//!
//! Bills of materials. Quantities arrive as decimal strings with a unit and
//! are stored as base units of the referenced item.
//!
//! ```text
//! recipes                         recipe_items (sort_order)
//! ┌────┬────────────┬──────────┐  ┌───────────┬─────────┬──────────────┐
//! │ id │ output_item│output_qty│  │ recipe_id │ item_id │ qty_required │
//! ├────┼────────────┼──────────┤  ├───────────┼─────────┼──────────────┤
//! │ 1  │ 7 (plane)  │ 1000     │  │ 1         │ 3       │ 3000         │
//! └────┴────────────┴──────────┘  │ 1         │ 4 (opt) │ 500          │
//!                                 └───────────┴─────────┴──────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use kiln_core::units::to_base_units;
use kiln_core::validation::{clean_optional_text, validate_name};
use kiln_core::{CoreError, Recipe, RecipeItem, ValidationError};

use crate::error::DbResult;
use crate::journal::JournalEntry;
use crate::pool::LedgerSettings;
use crate::repository::item;
use crate::uow::run_in_transaction;

const RECIPE_COLUMNS: &str = "id, name, output_item_id, output_qty, archived, notes, created_at";
const RECIPE_ITEM_COLUMNS: &str = "id, recipe_id, item_id, qty_required, is_optional, sort_order";

/// One component line of a new recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipeComponent {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    #[serde(default)]
    pub is_optional: bool,
}

/// Input for [`RecipeRepository::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    pub output_item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    pub notes: Option<String>,
    pub components: Vec<NewRecipeComponent>,
}

/// Input for [`RecipeRepository::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeUpdate {
    pub name: Option<String>,
    /// New output quantity. Must come with `uom`.
    pub quantity_decimal: Option<String>,
    pub uom: Option<String>,
    /// Blank clears.
    pub notes: Option<String>,
    /// Replaces every component line. Must not be empty.
    pub components: Option<Vec<NewRecipeComponent>>,
}

/// A recipe with its ordered component lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeWithItems {
    pub recipe: Recipe,
    pub items: Vec<RecipeItem>,
}

/// Repository for recipes.
#[derive(Debug, Clone)]
pub struct RecipeRepository {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl RecipeRepository {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        RecipeRepository { pool, settings }
    }

    /// Creates a recipe and its components in one transaction.
    ///
    /// Every quantity is normalized against the referenced item's dimension.
    /// Component order is preserved as `sort_order`.
    pub async fn create(&self, new: NewRecipe) -> DbResult<RecipeWithItems> {
        self.settings.ensure_writable()?;

        let name = validate_name("name", &new.name)?;
        if new.components.is_empty() {
            return Err(ValidationError::required("components").into());
        }
        let notes = clean_optional_text(new.notes.as_deref());

        let recipe_id = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move {
                let output = item::fetch(&mut *conn, new.output_item_id).await?;
                let output_qty = to_base_units(output.dimension, &new.uom, &new.quantity_decimal)?;
                let now = Utc::now();

                let recipe_id = sqlx::query(
                    "INSERT INTO recipes (name, output_item_id, output_qty, archived, notes, created_at) \
                     VALUES (?, ?, ?, 0, ?, ?)",
                )
                .bind(&name)
                .bind(output.id)
                .bind(output_qty)
                .bind(notes.as_deref())
                .bind(now)
                .execute(&mut *conn)
                .await?
                .last_insert_rowid();

                insert_components(conn, recipe_id, &new.components).await?;

                Ok(recipe_id)
            })
        })
        .await?;

        info!(recipe_id, "Recipe created");
        let created = self.get(recipe_id).await?;
        self.settings
            .journal(JournalEntry::recipes(
                "recipe_created",
                json!({
                    "recipe_id": recipe_id,
                    "output_item_id": created.recipe.output_item_id,
                    "output_qty": created.recipe.output_qty,
                    "components": created.items.len(),
                }),
            ))
            .await;
        Ok(created)
    }

    /// Edits a recipe in one transaction.
    ///
    /// A new component list replaces the old one wholesale, keeping the given
    /// order. Archived recipes are frozen.
    pub async fn update(&self, id: i64, update: RecipeUpdate) -> DbResult<RecipeWithItems> {
        self.settings.ensure_writable()?;

        let name = update
            .name
            .as_deref()
            .map(|name| validate_name("name", name))
            .transpose()?;
        let output_qty_input = match (update.quantity_decimal, update.uom) {
            (Some(quantity_decimal), Some(uom)) => Some((quantity_decimal, uom)),
            (None, None) => None,
            (Some(_), None) => return Err(ValidationError::required("uom").into()),
            (None, Some(_)) => return Err(ValidationError::required("quantity_decimal").into()),
        };
        if update.components.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(ValidationError::required("components").into());
        }
        let notes = update.notes.map(|notes| clean_optional_text(Some(notes.as_str())));
        let components = update.components;
        let replaces_components = components.is_some();

        run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move {
                let recipe = fetch(&mut *conn, id).await?;
                if recipe.archived {
                    return Err(CoreError::RecipeArchived(id).into());
                }

                if let Some(name) = &name {
                    sqlx::query("UPDATE recipes SET name = ? WHERE id = ?")
                        .bind(name)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                if let Some((quantity_decimal, uom)) = &output_qty_input {
                    let output = item::fetch(&mut *conn, recipe.output_item_id).await?;
                    let output_qty = to_base_units(output.dimension, uom, quantity_decimal)?;
                    sqlx::query("UPDATE recipes SET output_qty = ? WHERE id = ?")
                        .bind(output_qty)
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                if let Some(notes) = &notes {
                    sqlx::query("UPDATE recipes SET notes = ? WHERE id = ?")
                        .bind(notes.as_deref())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                }
                if let Some(components) = &components {
                    sqlx::query("DELETE FROM recipe_items WHERE recipe_id = ?")
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    insert_components(conn, id, components).await?;
                }
                Ok(())
            })
        })
        .await?;

        info!(recipe_id = id, replaces_components, "Recipe updated");
        let updated = self.get(id).await?;
        self.settings
            .journal(JournalEntry::recipes(
                "recipe_updated",
                json!({
                    "recipe_id": id,
                    "output_qty": updated.recipe.output_qty,
                    "components": updated.items.len(),
                    "replaced_components": replaces_components,
                }),
            ))
            .await;
        Ok(updated)
    }

    /// Gets a recipe with its components in `sort_order`.
    pub async fn get(&self, id: i64) -> DbResult<RecipeWithItems> {
        let recipe = fetch(&self.pool, id).await?;
        let items = list_components(&self.pool, id).await?;
        Ok(RecipeWithItems { recipe, items })
    }

    /// Lists recipes by name.
    pub async fn list(&self, include_archived: bool) -> DbResult<Vec<Recipe>> {
        let sql = format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE archived = 0 OR ? ORDER BY name, id"
        );
        let recipes = sqlx::query_as::<_, Recipe>(&sql)
            .bind(include_archived)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = recipes.len(), "Listed recipes");
        Ok(recipes)
    }

    /// Archives a recipe. Archived recipes cannot be run.
    pub async fn archive(&self, id: i64) -> DbResult<()> {
        self.settings.ensure_writable()?;

        let result = sqlx::query("UPDATE recipes SET archived = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::RecipeNotFound(id).into());
        }

        info!(recipe_id = id, "Recipe archived");
        self.settings
            .journal(JournalEntry::recipes("recipe_archived", json!({ "recipe_id": id })))
            .await;
        Ok(())
    }
}

// =============================================================================
// Row Helpers
// =============================================================================

/// Loads one recipe, mapping a missing row to `RecipeNotFound`.
pub async fn fetch<'e, E>(executor: E, id: i64) -> DbResult<Recipe>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?");
    sqlx::query_as::<_, Recipe>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| CoreError::RecipeNotFound(id).into())
}

/// Writes component lines with `sort_order` following slice order.
async fn insert_components(
    conn: &mut SqliteConnection,
    recipe_id: i64,
    components: &[NewRecipeComponent],
) -> DbResult<()> {
    for (position, component) in components.iter().enumerate() {
        let input = item::fetch(&mut *conn, component.item_id).await?;
        let qty_required = to_base_units(input.dimension, &component.uom, &component.quantity_decimal)?;

        sqlx::query(
            "INSERT INTO recipe_items (recipe_id, item_id, qty_required, is_optional, sort_order) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(recipe_id)
        .bind(input.id)
        .bind(qty_required)
        .bind(component.is_optional)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Component lines in `sort_order`.
pub async fn list_components<'e, E>(executor: E, recipe_id: i64) -> DbResult<Vec<RecipeItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {RECIPE_ITEM_COLUMNS} FROM recipe_items WHERE recipe_id = ? ORDER BY sort_order, id"
    );
    Ok(sqlx::query_as::<_, RecipeItem>(&sql)
        .bind(recipe_id)
        .fetch_all(executor)
        .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::journal::JsonlJournal;
    use kiln_core::Dimension;
    use crate::pool::{Database, DbConfig};
    use std::sync::Arc;
    use uuid::Uuid;

    fn component(item_id: i64, qty: &str, uom: &str, is_optional: bool) -> NewRecipeComponent {
        NewRecipeComponent {
            item_id,
            quantity_decimal: qty.into(),
            uom: uom.into(),
            is_optional,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_recipe() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let clip = fixtures::count_item(&db, "Clip").await;
        let plane = fixtures::count_item(&db, "Plane").await;

        let created = db
            .recipes()
            .create(NewRecipe {
                name: "Plane".into(),
                output_item_id: plane.id,
                quantity_decimal: "1".into(),
                uom: "ea".into(),
                notes: None,
                components: vec![
                    NewRecipeComponent {
                        item_id: paper.id,
                        quantity_decimal: "3".into(),
                        uom: "ea".into(),
                        is_optional: false,
                    },
                    NewRecipeComponent {
                        item_id: clip.id,
                        quantity_decimal: "0.5".into(),
                        uom: "ea".into(),
                        is_optional: true,
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(created.recipe.output_qty, 1000);
        assert_eq!(created.items.len(), 2);
        assert_eq!(created.items[0].item_id, paper.id);
        assert_eq!(created.items[0].qty_required, 3000);
        assert!(created.items[1].is_optional);
        assert_eq!(created.items[1].qty_required, 500);
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_bad_component() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let paper = fixtures::count_item(&db, "Paper").await;
        let plane = fixtures::count_item(&db, "Plane").await;

        let err = db
            .recipes()
            .create(NewRecipe {
                name: "Plane".into(),
                output_item_id: plane.id,
                quantity_decimal: "1".into(),
                uom: "ea".into(),
                notes: None,
                components: vec![NewRecipeComponent {
                    item_id: paper.id,
                    quantity_decimal: "3".into(),
                    uom: "kg".into(),
                    is_optional: false,
                }],
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "unsupported_uom");
        assert!(db.recipes().list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_archive_hides_from_default_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recipe = fixtures::plane_recipe(&db).await;

        db.recipes().archive(recipe.recipe.id).await.unwrap();

        assert!(db.recipes().list(false).await.unwrap().is_empty());
        let all = db.recipes().list(true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].archived);

        let err = db.recipes().archive(999).await.unwrap_err();
        assert_eq!(err.code(), "recipe_not_found");
    }

    #[tokio::test]
    async fn test_update_edits_output_and_replaces_components() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recipe = fixtures::plane_recipe(&db).await;
        let paper_id = recipe.items[0].item_id;
        let glue = fixtures::item(&db, "Glue", Dimension::Weight, "g").await;

        let updated = db
            .recipes()
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    name: Some("Glider".into()),
                    quantity_decimal: Some("2".into()),
                    uom: Some("ea".into()),
                    notes: Some("  ".into()),
                    components: Some(vec![
                        component(glue.id, "0.5", "g", true),
                        component(paper_id, "4", "ea", false),
                    ]),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.recipe.name, "Glider");
        assert_eq!(updated.recipe.output_qty, 2000);
        assert_eq!(updated.recipe.notes, None);
        assert_eq!(updated.items.len(), 2);
        assert_eq!(updated.items[0].item_id, glue.id);
        assert_eq!(updated.items[0].qty_required, 500);
        assert!(updated.items[0].is_optional);
        assert_eq!(updated.items[1].item_id, paper_id);
        assert_eq!(updated.items[1].qty_required, 4000);

        let renamed_only = db
            .recipes()
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    name: Some("Dart".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed_only.recipe.name, "Dart");
        assert_eq!(renamed_only.recipe.output_qty, 2000);
        assert_eq!(renamed_only.items, updated.items);
    }

    #[tokio::test]
    async fn test_update_rolls_back_on_bad_component() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recipe = fixtures::plane_recipe(&db).await;
        let paper_id = recipe.items[0].item_id;

        let err = db
            .recipes()
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    quantity_decimal: Some("2".into()),
                    uom: Some("ea".into()),
                    components: Some(vec![
                        component(paper_id, "4", "ea", false),
                        component(paper_id, "1", "kg", false),
                    ]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_uom");

        let unchanged = db.recipes().get(recipe.recipe.id).await.unwrap();
        assert_eq!(unchanged, recipe);
    }

    #[tokio::test]
    async fn test_update_rejections() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let recipe = fixtures::plane_recipe(&db).await;
        let recipes = db.recipes();

        let err = recipes
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    quantity_decimal: Some("2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "required");

        let err = recipes
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    components: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "required");

        let err = recipes.update(999, RecipeUpdate::default()).await.unwrap_err();
        assert_eq!(err.code(), "recipe_not_found");

        recipes.archive(recipe.recipe.id).await.unwrap();
        let err = recipes
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    name: Some("Glider".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "recipe_archived");
        assert_eq!(recipes.get(recipe.recipe.id).await.unwrap().recipe.name, recipe.recipe.name);
    }

    #[tokio::test]
    async fn test_recipe_changes_are_journaled() {
        let dir = std::env::temp_dir().join(format!("kiln-recipes-{}", Uuid::new_v4().simple()));
        let config = DbConfig::in_memory().journal(Arc::new(JsonlJournal::new(&dir)));
        let db = Database::new(config).await.unwrap();

        let recipe = fixtures::plane_recipe(&db).await;
        db.recipes()
            .update(
                recipe.recipe.id,
                RecipeUpdate {
                    quantity_decimal: Some("2".into()),
                    uom: Some("ea".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        db.recipes().archive(recipe.recipe.id).await.unwrap();

        let lines = std::fs::read_to_string(dir.join("recipes.jsonl")).unwrap();
        let actions: Vec<String> = lines
            .lines()
            .map(|line| {
                let entry: JournalEntry = serde_json::from_str(line).unwrap();
                assert_eq!(entry.payload["recipe_id"], recipe.recipe.id);
                entry.action
            })
            .collect();
        assert_eq!(actions, ["recipe_created", "recipe_updated", "recipe_archived"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
