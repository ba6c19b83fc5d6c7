//! # Manufacturing Math
//!
//! The I/O-free half of a manufacturing run: request parsing, recipe
//! scaling, shortage detection and the cost roll-up. `kiln-db` feeds these
//! with rows and batch allocations inside its transaction.
//!
//! ## Run Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Manufacturing Run Pipeline                           │
//! │                                                                         │
//! │  JSON payload                                                          │
//! │       │  RunRequest::parse()                                           │
//! │       ▼                                                                 │
//! │  RunRequest::Recipe { .. }  |  RunRequest::Adhoc { .. }                │
//! │       │  scale_requirement() per recipe line                           │
//! │       ▼                                                                 │
//! │  Vec<ComponentRequirement>                                             │
//! │       │  compute_shortages(on_hand)                                    │
//! │       ├──────────────► shortages? → failed_insufficient_stock          │
//! │       ▼                                                                 │
//! │  FIFO allocations ──► CostRollup::record()                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CostRollup::per_output_cents() ──► output batch unit cost             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CostRollup::into_meta() ──► RunMeta::Completed                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Cost Basis
//! Batch costs are cents per display unit of the item. A line's cost is
//! `round_half_up(unit_cost × qty_base / multiplier)`; the output cost is
//! `round_half_up(cost_inputs / output_human_qty)`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{scale_half_up, Money};
use crate::types::{Allocation, RunMeta, Shortage};
use crate::validation::{clean_optional_text, reject_legacy_quantity_keys, ValidationResult};

// =============================================================================
// Run Request
// =============================================================================

/// One component of an ad-hoc run, still in human units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInput {
    pub item_id: i64,
    pub quantity_decimal: String,
    pub uom: String,
    #[serde(default)]
    pub is_optional: bool,
}

/// A manufacturing request, resolved once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunRequest {
    /// Produce `quantity_decimal uom` of a recipe's output item.
    Recipe {
        recipe_id: i64,
        quantity_decimal: String,
        uom: String,
        notes: Option<String>,
    },
    /// Produce an item from an explicit component list.
    Adhoc {
        output_item_id: i64,
        quantity_decimal: String,
        uom: String,
        components: Vec<ComponentInput>,
        notes: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawRunPayload {
    recipe_id: Option<i64>,
    output_item_id: Option<i64>,
    components: Option<Vec<Value>>,
    quantity_decimal: Option<Value>,
    uom: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    item_id: Option<i64>,
    quantity_decimal: Option<Value>,
    uom: Option<String>,
    #[serde(default)]
    is_optional: bool,
}

impl RunRequest {
    /// Parses a boundary payload.
    ///
    /// ## Rules
    /// - Exactly one run per payload (arrays are rejected)
    /// - Legacy integer keys (`qty`, `qty_base`, ...) are rejected anywhere
    /// - `quantity_decimal` and `uom` are required
    /// - `recipe_id` cannot be mixed with `output_item_id`/`components`
    /// - Ad-hoc runs need at least one component
    ///
    /// ## Example
    /// ```rust
    /// use kiln_core::manufacturing::RunRequest;
    /// use serde_json::json;
    ///
    /// let req = RunRequest::parse(&json!({
    ///     "recipe_id": 3, "quantity_decimal": "2", "uom": "ea"
    /// })).unwrap();
    /// assert_eq!(req.recipe_id(), Some(3));
    /// ```
    pub fn parse(payload: &Value) -> ValidationResult<RunRequest> {
        let object = match payload {
            Value::Object(object) => object,
            Value::Array(_) => {
                return Err(ValidationError::invalid_format("payload", "single run only"))
            }
            _ => return Err(ValidationError::invalid_format("payload", "expected an object")),
        };
        reject_legacy_quantity_keys(object)?;

        let raw: RawRunPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?;

        let quantity_decimal = decimal_text("quantity_decimal", raw.quantity_decimal.as_ref())?;
        let uom = required_text("uom", raw.uom.as_deref())?;
        let notes = clean_optional_text(raw.notes.as_deref());

        match raw.recipe_id {
            Some(recipe_id) => {
                let mut conflicting = Vec::new();
                if raw.output_item_id.is_some() {
                    conflicting.push("output_item_id".to_string());
                }
                if raw.components.is_some() {
                    conflicting.push("components".to_string());
                }
                if !conflicting.is_empty() {
                    conflicting.insert(0, "recipe_id".to_string());
                    return Err(ValidationError::ConflictingFields {
                        fields: conflicting,
                    });
                }
                Ok(RunRequest::Recipe {
                    recipe_id,
                    quantity_decimal,
                    uom,
                    notes,
                })
            }
            None => {
                let output_item_id = raw
                    .output_item_id
                    .ok_or_else(|| ValidationError::required("recipe_id"))?;
                let components = raw
                    .components
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| ValidationError::required("components"))?
                    .iter()
                    .map(parse_component)
                    .collect::<ValidationResult<Vec<_>>>()?;

                Ok(RunRequest::Adhoc {
                    output_item_id,
                    quantity_decimal,
                    uom,
                    components,
                    notes,
                })
            }
        }
    }

    pub fn recipe_id(&self) -> Option<i64> {
        match self {
            RunRequest::Recipe { recipe_id, .. } => Some(*recipe_id),
            RunRequest::Adhoc { .. } => None,
        }
    }

    /// `(quantity_decimal, uom)` of the requested output.
    pub fn output_quantity(&self) -> (&str, &str) {
        match self {
            RunRequest::Recipe {
                quantity_decimal,
                uom,
                ..
            }
            | RunRequest::Adhoc {
                quantity_decimal,
                uom,
                ..
            } => (quantity_decimal, uom),
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            RunRequest::Recipe { notes, .. } | RunRequest::Adhoc { notes, .. } => notes.as_deref(),
        }
    }
}

fn parse_component(value: &Value) -> ValidationResult<ComponentInput> {
    let object: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| ValidationError::invalid_format("components", "expected objects"))?;
    reject_legacy_quantity_keys(object)?;

    let raw: RawComponent = serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::invalid_format("components", e.to_string()))?;

    Ok(ComponentInput {
        item_id: raw
            .item_id
            .ok_or_else(|| ValidationError::required("components.item_id"))?,
        quantity_decimal: decimal_text(
            "components.quantity_decimal",
            raw.quantity_decimal.as_ref(),
        )?,
        uom: required_text("components.uom", raw.uom.as_deref())?,
        is_optional: raw.is_optional,
    })
}

/// Decimal fields may arrive as strings or JSON numbers.
fn decimal_text(field: &str, value: Option<&Value>) -> ValidationResult<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(ValidationError::required(field)),
        Some(_) => Err(ValidationError::invalid_format(field, "expected a decimal string")),
    }
}

fn required_text(field: &str, value: Option<&str>) -> ValidationResult<String> {
    clean_optional_text(value).ok_or_else(|| ValidationError::required(field))
}

// =============================================================================
// Requirements and Shortages
// =============================================================================

/// A component resolved to base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequirement {
    pub item_id: i64,
    pub required: i64,
    pub is_optional: bool,
    /// Base units per display unit of the component item (its cost basis).
    pub multiplier: i64,
}

/// Scales one recipe line to the requested output, rounding half-up.
///
/// ## Example
/// ```rust
/// use kiln_core::manufacturing::scale_requirement;
///
/// // 3 ea per 1 ea of output, asked for 2 ea
/// assert_eq!(scale_requirement(3000, 2000, 1000), 6000);
/// // 1 mc per 3 mc, asked for 2 mc → 0.67 → 1
/// assert_eq!(scale_requirement(1, 2, 3), 1);
/// ```
pub fn scale_requirement(qty_required: i64, requested_output: i64, recipe_output: i64) -> i64 {
    scale_half_up(qty_required, requested_output, recipe_output)
}

/// Shortages over the non-optional requirements.
///
/// Requirements for the same item are summed before comparing. Optional
/// components never produce a shortage.
pub fn compute_shortages(
    requirements: &[ComponentRequirement],
    on_hand: impl Fn(i64) -> i64,
) -> Vec<Shortage> {
    let mut totals: Vec<(i64, i64)> = Vec::new();
    for req in requirements.iter().filter(|r| !r.is_optional) {
        match totals.iter_mut().find(|(item_id, _)| *item_id == req.item_id) {
            Some((_, total)) => *total += req.required,
            None => totals.push((req.item_id, req.required)),
        }
    }

    totals
        .into_iter()
        .filter_map(|(item_id, required)| {
            let available = on_hand(item_id);
            (available < required).then(|| Shortage::new(item_id, required, available))
        })
        .collect()
}

// =============================================================================
// Cost Roll-up
// =============================================================================

/// Accumulates FIFO allocations into a run's cost.
#[derive(Debug, Default, Clone)]
pub struct CostRollup {
    allocations: Vec<Allocation>,
    total: Money,
}

impl CostRollup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `qty` base units taken from one batch.
    pub fn record(
        &mut self,
        item_id: i64,
        batch_id: i64,
        qty: i64,
        unit_cost_cents: i64,
        multiplier: i64,
    ) -> &Allocation {
        let line = Money::line_total(unit_cost_cents, qty, multiplier);
        self.total += line;
        self.allocations.push(Allocation {
            item_id,
            batch_id,
            qty,
            unit_cost_cents,
            line_cost_cents: line.cents(),
        });
        &self.allocations[self.allocations.len() - 1]
    }

    pub fn cost_inputs(&self) -> Money {
        self.total
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Cost per output display unit.
    ///
    /// Fails with `InvalidOutputQty` when the output is zero or negative.
    pub fn per_output_cents(&self, output_qty_base: i64, output_multiplier: i64) -> CoreResult<i64> {
        self.total
            .per_unit(output_qty_base, output_multiplier)
            .map(|m| m.cents())
            .ok_or(CoreError::InvalidOutputQty { output_qty_base })
    }

    /// Audit payload for a completed run.
    pub fn into_meta(self, output_qty_base: i64, per_output_cents: i64, output_batch_id: i64) -> RunMeta {
        RunMeta::Completed {
            output_qty_base,
            cost_inputs_cents: self.total.cents(),
            per_output_cents,
            allocations: self.allocations,
            output_batch_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(item_id: i64, required: i64, is_optional: bool) -> ComponentRequirement {
        ComponentRequirement {
            item_id,
            required,
            is_optional,
            multiplier: 1000,
        }
    }

    #[test]
    fn test_parse_recipe_request() {
        let parsed = RunRequest::parse(&json!({
            "recipe_id": 4,
            "quantity_decimal": 2,
            "uom": " ea ",
            "notes": "  "
        }))
        .unwrap();
        assert_eq!(
            parsed,
            RunRequest::Recipe {
                recipe_id: 4,
                quantity_decimal: "2".into(),
                uom: "ea".into(),
                notes: None,
            }
        );
        assert_eq!(parsed.output_quantity(), ("2", "ea"));
    }

    #[test]
    fn test_parse_adhoc_request() {
        let parsed = RunRequest::parse(&json!({
            "output_item_id": 9,
            "quantity_decimal": "1.5",
            "uom": "ea",
            "components": [
                {"item_id": 1, "quantity_decimal": "3", "uom": "ea"},
                {"item_id": 2, "quantity_decimal": "10", "uom": "g", "is_optional": true}
            ]
        }))
        .unwrap();

        match parsed {
            RunRequest::Adhoc {
                output_item_id,
                components,
                ..
            } => {
                assert_eq!(output_item_id, 9);
                assert_eq!(components.len(), 2);
                assert!(!components[0].is_optional);
                assert!(components[1].is_optional);
            }
            other => panic!("expected adhoc, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejections() {
        let code = |v: Value| RunRequest::parse(&v).unwrap_err().code();

        assert_eq!(code(json!([{"recipe_id": 1}])), "invalid_format");
        assert_eq!(
            code(json!({"recipe_id": 1, "qty": 2, "quantity_decimal": "2", "uom": "ea"})),
            "legacy_quantity_keys_forbidden"
        );
        assert_eq!(
            code(json!({"output_item_id": 1, "quantity_decimal": "2", "uom": "ea",
                        "components": [{"item_id": 2, "qty_base": 5}]})),
            "legacy_quantity_keys_forbidden"
        );
        assert_eq!(code(json!({"recipe_id": 1, "uom": "ea"})), "required");
        assert_eq!(code(json!({"recipe_id": 1, "quantity_decimal": "2"})), "required");
        assert_eq!(
            code(json!({"recipe_id": 1, "output_item_id": 2, "quantity_decimal": "2", "uom": "ea"})),
            "conflicting_fields"
        );
        assert_eq!(
            code(json!({"output_item_id": 2, "quantity_decimal": "2", "uom": "ea", "components": []})),
            "required"
        );
        assert_eq!(code(json!({"quantity_decimal": "2", "uom": "ea"})), "required");
    }

    #[test]
    fn test_scale_requirement_rounds_half_up() {
        assert_eq!(scale_requirement(3000, 2000, 1000), 6000);
        assert_eq!(scale_requirement(5, 1, 2), 3);
        assert_eq!(scale_requirement(1, 1, 3), 0);
    }

    #[test]
    fn test_compute_shortages_skips_optional_and_sums_duplicates() {
        let reqs = [req(1, 6000, false), req(2, 500, true), req(3, 400, false), req(3, 400, false)];
        let shortages = compute_shortages(&reqs, |item_id| match item_id {
            1 => 4000,
            2 => 0,
            3 => 700,
            _ => 0,
        });

        assert_eq!(
            shortages,
            vec![Shortage::new(1, 6000, 4000), Shortage::new(3, 800, 700)]
        );
    }

    #[test]
    fn test_cost_rollup_matches_worked_example() {
        // Batches 4 ea @ 10¢ and 4 ea @ 20¢; 6 ea consumed for 2 ea output
        let mut rollup = CostRollup::new();
        assert_eq!(rollup.record(1, 10, 4000, 10, 1000).line_cost_cents, 40);
        assert_eq!(rollup.record(1, 11, 2000, 20, 1000).line_cost_cents, 40);

        assert_eq!(rollup.cost_inputs().cents(), 80);
        let per_output = rollup.per_output_cents(2000, 1000).unwrap();
        assert_eq!(per_output, 40);

        match rollup.into_meta(2000, per_output, 77) {
            RunMeta::Completed {
                cost_inputs_cents,
                allocations,
                output_batch_id,
                ..
            } => {
                assert_eq!(cost_inputs_cents, 80);
                assert_eq!(allocations.len(), 2);
                assert_eq!(output_batch_id, 77);
            }
            other => panic!("unexpected meta {other:?}"),
        }
    }

    #[test]
    fn test_cost_conservation_within_rounding() {
        for (cost, output_base) in [(80, 2000), (100, 3000), (55, 2000), (7, 500)] {
            let mut rollup = CostRollup::new();
            rollup.record(1, 1, 1000, cost, 1000);
            let per = rollup.per_output_cents(output_base, 1000).unwrap();
            // |per × output_human − cost| ≤ ½ × output_human
            let drift = (per as i128 * output_base as i128 - cost as i128 * 1000).abs();
            assert!(drift * 2 <= output_base as i128, "cost {cost} output {output_base}");
        }
    }

    #[test]
    fn test_per_output_rejects_zero_output() {
        let rollup = CostRollup::new();
        assert_eq!(
            rollup.per_output_cents(0, 1000),
            Err(CoreError::InvalidOutputQty { output_qty_base: 0 })
        );
    }
}
