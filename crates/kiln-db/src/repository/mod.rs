//! # Repository Module
//!
//! SQL for every ledger table lives here.
//!
//! ## Two Access Styles
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Reads (any executor)                Writes (inside a unit of work)     │
//! │  ────────────────────                ─────────────────────────────      │
//! │  batch::list_for_item(&pool, id)     batch::insert(conn, &new, at)      │
//! │  run::fetch(&pool, id)               movement::insert(conn, &new, at)   │
//! │  cash::list_between(&pool, ..)       item::bump_qty_stored(conn, ..)    │
//! │                                                                         │
//! │  Reads accept &SqlitePool or &mut SqliteConnection.                    │
//! │  Writes take &mut SqliteConnection so they join the caller's           │
//! │  transaction; none of them commit on their own.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ItemRepository`](item::ItemRepository) - Item create/get/list
//! - [`RecipeRepository`](recipe::RecipeRepository) - Recipes and components
//! - [`batch`], [`movement`], [`run`], [`cash`] - row-level helpers used by
//!   the ledger services

pub mod batch;
pub mod cash;
pub mod item;
pub mod movement;
pub mod recipe;
pub mod run;
