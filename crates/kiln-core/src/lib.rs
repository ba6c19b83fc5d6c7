//! # kiln-core: Pure Domain Logic for Kiln Ledger
//!
//! Everything the ledger decides that does not need a database: unit
//! normalization, integer money, costing math and the error taxonomy.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Kiln Ledger Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Request layer (HTTP handlers, CLI, seed)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               kiln-db (ledger services, SQLite)                 │   │
//! │  │   BatchLedger • ManufacturingEngine • FinanceLedger • Integrity │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kiln-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────────┐  ┌─────────┐ │   │
//! │  │   │   units   │  │   money   │  │ manufacturing │  │ finance │ │   │
//! │  │   │ Dimension │  │   Money   │  │  RunRequest   │  │ Profit  │ │   │
//! │  │   │ base qty  │  │ half-up   │  │  CostRollup   │  │ Summary │ │   │
//! │  │   └───────────┘  └───────────┘  └───────────────┘  └─────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO FLOATS IN MONEY PATHS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`units`] - Dimensions, unit tables, decimal → base unit normalization
//! - [`money`] - `Money` and half-up integer rounding
//! - [`types`] - Items, batches, movements, recipes, runs, cash events
//! - [`manufacturing`] - Run request parsing, scaling, shortages, cost roll-up
//! - [`finance`] - Profit window/summary, weighted-average restock cost
//! - [`validation`] - Input checks run before any write
//! - [`error`] - `CoreError` and `ValidationError`
//!
//! ## Example Usage
//!
//! ```rust
//! use kiln_core::units::{to_base_units, Dimension};
//! use kiln_core::money::Money;
//!
//! // "1.5 ea" is 1500 base units
//! let qty = to_base_units(Dimension::Count, "ea", "1.5").unwrap();
//! assert_eq!(qty, 1500);
//!
//! // at 10¢ per ea that costs 15¢
//! assert_eq!(Money::line_total(10, qty, 1000).cents(), 15);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod finance;
pub mod manufacturing;
pub mod money;
pub mod types;
pub mod units;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;
pub use units::Dimension;
