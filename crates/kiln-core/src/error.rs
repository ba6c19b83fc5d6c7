//! # Error Types
//!
//! Domain-specific error types for kiln-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kiln-core errors (this file)                                          │
//! │  ├── CoreError        - Business outcomes (shortages, missing rows)    │
//! │  └── ValidationError  - Input shape/range failures                     │
//! │                                                                         │
//! │  kiln-db errors (separate crate)                                       │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Codes
//! Every variant exposes a stable snake_case `code()`. Callers match on the
//! code (or the variant), never on the Display text. `ValidationError`
//! serializes as `{"code": "...", ...fields}` so a boundary layer can hand
//! it to a client unchanged.

use serde::Serialize;
use thiserror::Error;

use crate::types::Shortage;
use crate::units::Dimension;

// =============================================================================
// Core Error
// =============================================================================

/// Core business errors.
///
/// These are expected, modeled outcomes of ledger operations. They are not
/// system faults: the ledger is unchanged whenever one of them is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Item does not exist.
    #[error("Item not found: {0}")]
    ItemNotFound(i64),

    /// Recipe does not exist.
    #[error("Recipe not found: {0}")]
    RecipeNotFound(i64),

    /// Recipe was archived and can no longer be run.
    #[error("Recipe {0} is archived")]
    RecipeArchived(i64),

    /// Recipe output quantity is zero or negative, so it cannot be scaled.
    #[error("Recipe {recipe_id} has invalid output quantity {output_qty}")]
    RecipeInvalidOutputQty { recipe_id: i64, output_qty: i64 },

    /// Manufacturing run does not exist.
    #[error("Manufacturing run not found: {0}")]
    RunNotFound(i64),

    /// Not enough stock to cover one or more components.
    ///
    /// ## User Workflow
    /// ```text
    /// Run "paper plane" x2
    ///      │
    ///      ▼
    /// Need 6 ea paper, on hand 4 ea
    ///      │
    ///      ▼
    /// InsufficientStock { shortages: [{item 1, required 6000, available 4000}],
    ///                     run_id: Some(17) }   ← failed run kept for audit
    /// ```
    #[error("Insufficient stock for {} component(s)", shortages.len())]
    InsufficientStock {
        shortages: Vec<Shortage>,
        run_id: Option<i64>,
    },

    /// Output quantity converts to zero or less in the output item's unit.
    #[error("Invalid output quantity: {output_qty_base}")]
    InvalidOutputQty { output_qty_base: i64 },

    /// Cash sales are only recorded for count-dimension items.
    #[error("Item {item_id} has dimension {dimension}; cash sales are count-only")]
    SaleCountOnly { item_id: i64, dimension: Dimension },

    /// Refund restock pointed at a sale that never moved this item.
    #[error("No sale movements for item {item_id} under source id {related_source_id}")]
    RelatedSaleNotFound {
        item_id: i64,
        related_source_id: String,
    },

    /// The ledger handle was opened read-only.
    #[error("Writes are disabled for this ledger")]
    WritesDisabled,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ItemNotFound(_) => "item_not_found",
            CoreError::RecipeNotFound(_) => "recipe_not_found",
            CoreError::RecipeArchived(_) => "recipe_archived",
            CoreError::RecipeInvalidOutputQty { .. } => "recipe_invalid_output_qty",
            CoreError::RunNotFound(_) => "run_not_found",
            CoreError::InsufficientStock { .. } => "insufficient_stock",
            CoreError::InvalidOutputQty { .. } => "invalid_output_qty",
            CoreError::SaleCountOnly { .. } => "sold_cash_event_count_only",
            CoreError::RelatedSaleNotFound { .. } => "related_source_id_not_found_for_item",
            CoreError::WritesDisabled => "writes_disabled",
            CoreError::Validation(inner) => inner.code(),
        }
    }

    /// Shortage list when this is an `InsufficientStock` error.
    pub fn shortages(&self) -> Option<&[Shortage]> {
        match self {
            CoreError::InsufficientStock { shortages, .. } => Some(shortages),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any write. Each variant carries the structured detail a
/// caller needs (dimension, unit, field, offending value).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (malformed payload, bad date, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Dimension string is not one of the known dimensions.
    #[error("Unsupported dimension '{dimension}'")]
    UnsupportedDimension { dimension: String },

    /// Quantity unit is not valid for the dimension.
    #[error("Unsupported unit '{uom}' for dimension {dimension}")]
    UnsupportedUom { dimension: Dimension, uom: String },

    /// Cost unit is not valid for the dimension.
    #[error("Unsupported cost unit '{uom}' for dimension {dimension}")]
    UnsupportedCostUom { dimension: Dimension, uom: String },

    /// Quantity is not a decimal, or is zero/negative.
    #[error("{field} '{value}' is not a valid positive quantity")]
    InvalidQuantity { field: String, value: String },

    /// Quantity would land between two base units.
    #[error("{value} {uom} is not a whole number of {dimension} base units")]
    FractionalBaseQuantityNotAllowed {
        dimension: Dimension,
        uom: String,
        value: String,
    },

    /// Cost is not a decimal, or is negative.
    #[error("Unit cost '{value}' is invalid")]
    InvalidUnitCost { value: String },

    /// Refund restock needs either an explicit cost or a sale to derive it from.
    #[error("Restock needs unit_cost_cents when related_source_id is not given")]
    RestockUnitCostRequiredWithoutRelatedSourceId,

    /// Legacy integer quantity keys present in a payload.
    #[error("Legacy quantity keys are not accepted: {keys:?}")]
    LegacyQuantityKeysForbidden { keys: Vec<String> },

    /// Mutually exclusive fields were supplied together.
    #[error("Fields cannot be combined: {fields:?}")]
    ConflictingFields { fields: Vec<String> },

    /// Value is not in the allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    /// Stable machine-readable code (same string as the serialized `code` tag).
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Required { .. } => "required",
            ValidationError::TooLong { .. } => "too_long",
            ValidationError::MustBePositive { .. } => "must_be_positive",
            ValidationError::InvalidFormat { .. } => "invalid_format",
            ValidationError::UnsupportedDimension { .. } => "unsupported_dimension",
            ValidationError::UnsupportedUom { .. } => "unsupported_uom",
            ValidationError::UnsupportedCostUom { .. } => "unsupported_cost_uom",
            ValidationError::InvalidQuantity { .. } => "invalid_quantity",
            ValidationError::FractionalBaseQuantityNotAllowed { .. } => {
                "fractional_base_quantity_not_allowed"
            }
            ValidationError::InvalidUnitCost { .. } => "invalid_unit_cost",
            ValidationError::RestockUnitCostRequiredWithoutRelatedSourceId => {
                "restock_unit_cost_required_without_related_source_id"
            }
            ValidationError::LegacyQuantityKeysForbidden { .. } => {
                "legacy_quantity_keys_forbidden"
            }
            ValidationError::ConflictingFields { .. } => "conflicting_fields",
            ValidationError::NotAllowed { .. } => "not_allowed",
        }
    }

    /// Shorthand for `Required`.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for `InvalidFormat`.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
