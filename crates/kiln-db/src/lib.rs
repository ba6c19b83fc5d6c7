//! # kiln-db: Ledger Services for Kiln
//!
//! SQLite persistence and the transactional services of the workshop
//! ledger: FIFO batches, manufacturing runs, cash events and the integrity
//! scan.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiln Data Flow                                   │
//! │                                                                         │
//! │  Caller (dashboard, CLI, seed)                                         │
//! │       │  quantity_decimal + uom, cents                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kiln-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ManufacturingEngine    FinanceLedger       BatchLedger        │   │
//! │  │          │                     │                  │             │   │
//! │  │          └─────────────────────┼──────────────────┘             │   │
//! │  │                                ▼                                │   │
//! │  │              add_batch_in / consume_fifo_in (ledger.rs)         │   │
//! │  │                                │                                │   │
//! │  │                 run_in_transaction (uow.rs)                     │   │
//! │  │                                │                                │   │
//! │  │        repository/*  ◄─────────┘     AuditJournal (post-commit) │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys, append-only triggers)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, `DbConfig`, per-handle `LedgerSettings`
//! - [`config`] - `kiln.toml` and `KILN_*` environment loading
//! - [`migrations`] - Embedded schema
//! - [`uow`] - The single transaction primitive
//! - [`repository`] - Row-level SQL
//! - [`ledger`] - FIFO batch ledger
//! - [`manufacturing`] - Manufacturing runs
//! - [`finance`] - Sales, refunds, expenses, profit summary
//! - [`dashboard`] - Inventory value, units produced and profit in one read
//! - [`integrity`] - Read-only consistency scan
//! - [`journal`] - Best-effort audit journal
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kiln_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("kiln.db")).await?;
//!
//! let paper = db.items().create(NewItem::new("Paper", Dimension::Count)).await?;
//! db.ledger().stock_in(paper.id, "4", "ea", 10, None).await?;
//! let on_hand = db.ledger().on_hand_qty(paper.id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod dashboard;
pub mod error;
pub mod finance;
pub mod integrity;
pub mod journal;
pub mod ledger;
pub mod manufacturing;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod uow;

#[cfg(test)]
mod fixtures;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::LedgerConfig;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, LedgerSettings};

pub use dashboard::{Dashboard, DashboardSummary};
pub use finance::FinanceLedger;
pub use integrity::{IntegrityReport, IntegrityValidator};
pub use journal::{AuditJournal, JsonlJournal, NoopJournal};
pub use ledger::BatchLedger;
pub use manufacturing::ManufacturingEngine;

// Repository re-exports for convenience
pub use repository::item::{ItemRepository, NewItem};
pub use repository::recipe::{NewRecipe, NewRecipeComponent, RecipeRepository, RecipeUpdate};
