//! # Manufacturing Engine
//!
//! Turns components into an output batch, costed from the exact FIFO
//! batches consumed.
//!
//! ## Run Lifecycle
//! ```text
//!                    validate_run()
//!                         │
//!           shortages? ───┼──── yes ──► failed_insufficient_stock (own tx)
//!                         │ no
//!                         ▼
//!   ┌──────────────── one transaction ─────────────────┐
//!   │  run row (created)                               │
//!   │  FIFO consume each component (source_id = run)   │
//!   │  output batch @ per_output_cents                 │
//!   │  run row → completed + meta                      │
//!   └──────────────────────────────────────────────────┘
//!                         │
//!        InsufficientStock inside? ── rollback, then failed run (own tx)
//! ```
//!
//! A failed run is always kept for audit, and the error carries its id.
//! Inventory is untouched by a failed run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use kiln_core::manufacturing::{
    compute_shortages, scale_requirement, ComponentRequirement, CostRollup, RunRequest,
};
use kiln_core::units::to_base_units;
use kiln_core::{CoreError, ManufacturingRun, RunMeta, RunStatus, Shortage, SourceKind};

use crate::error::{DbError, DbResult};
use crate::journal::JournalEntry;
use crate::ledger::{add_batch_in, consume_fifo_in};
use crate::pool::LedgerSettings;
use crate::repository::batch::{self, NewBatch};
use crate::repository::item;
use crate::repository::recipe;
use crate::repository::run::{self, NewRun};
use crate::uow::run_in_transaction;

/// A validated run, resolved to base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub recipe_id: Option<i64>,
    pub output_item_id: i64,
    pub output_qty_base: i64,
    /// Base units per display unit of the output item.
    pub output_multiplier: i64,
    pub components: Vec<ComponentRequirement>,
    /// Non-optional gaps against current on-hand stock.
    pub shortages: Vec<Shortage>,
    pub notes: Option<String>,
}

impl RunPlan {
    pub fn is_executable(&self) -> bool {
        self.shortages.is_empty()
    }
}

/// A stored run with its decoded audit payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: ManufacturingRun,
    pub meta: Option<RunMeta>,
}

/// Manufacturing service.
#[derive(Debug, Clone)]
pub struct ManufacturingEngine {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl ManufacturingEngine {
    pub fn new(pool: SqlitePool, settings: LedgerSettings) -> Self {
        ManufacturingEngine { pool, settings }
    }

    /// Resolves a request into a [`RunPlan`] without writing anything.
    ///
    /// ## Recipe Scaling
    /// ```text
    /// required = round_half_up(qty_required × requested / recipe.output_qty)
    /// ```
    /// A line that scales to zero is dropped.
    pub async fn validate_run(&self, request: &RunRequest) -> DbResult<RunPlan> {
        let (quantity_decimal, uom) = request.output_quantity();

        let (recipe_id, output_item_id, output_qty_base, components) = match request {
            RunRequest::Recipe { recipe_id, .. } => {
                let recipe = recipe::fetch(&self.pool, *recipe_id).await?;
                if recipe.archived {
                    return Err(CoreError::RecipeArchived(recipe.id).into());
                }
                if recipe.output_qty <= 0 {
                    return Err(CoreError::RecipeInvalidOutputQty {
                        recipe_id: recipe.id,
                        output_qty: recipe.output_qty,
                    }
                    .into());
                }

                let output = item::fetch(&self.pool, recipe.output_item_id).await?;
                let requested = to_base_units(output.dimension, uom, quantity_decimal)?;

                let mut components = Vec::new();
                for line in recipe::list_components(&self.pool, recipe.id).await? {
                    let required = scale_requirement(line.qty_required, requested, recipe.output_qty);
                    if required <= 0 {
                        debug!(recipe_id = recipe.id, item_id = line.item_id, "Scaled line is zero, skipped");
                        continue;
                    }
                    let input = item::fetch(&self.pool, line.item_id).await?;
                    components.push(ComponentRequirement {
                        item_id: input.id,
                        required,
                        is_optional: line.is_optional,
                        multiplier: input.basis_unit().1,
                    });
                }
                (Some(recipe.id), output.id, requested, components)
            }
            RunRequest::Adhoc {
                output_item_id,
                components: inputs,
                ..
            } => {
                let output = item::fetch(&self.pool, *output_item_id).await?;
                let requested = to_base_units(output.dimension, uom, quantity_decimal)?;

                let mut components = Vec::with_capacity(inputs.len());
                for component in inputs {
                    let input = item::fetch(&self.pool, component.item_id).await?;
                    let required =
                        to_base_units(input.dimension, &component.uom, &component.quantity_decimal)?;
                    components.push(ComponentRequirement {
                        item_id: input.id,
                        required,
                        is_optional: component.is_optional,
                        multiplier: input.basis_unit().1,
                    });
                }
                (None, output.id, requested, components)
            }
        };

        let output_multiplier = item::fetch(&self.pool, output_item_id).await?.basis_unit().1;

        let mut on_hand: HashMap<i64, i64> = HashMap::new();
        for component in &components {
            if !on_hand.contains_key(&component.item_id) {
                let qty = batch::sum_remaining(&self.pool, component.item_id).await?;
                on_hand.insert(component.item_id, qty);
            }
        }
        let shortages = compute_shortages(&components, |item_id| {
            on_hand.get(&item_id).copied().unwrap_or(0)
        });

        Ok(RunPlan {
            recipe_id,
            output_item_id,
            output_qty_base,
            output_multiplier,
            components,
            shortages,
            notes: request.notes().map(str::to_string),
        })
    }

    /// Parses a boundary payload and runs it.
    pub async fn run_json(&self, payload: &Value) -> DbResult<RunRecord> {
        let request = RunRequest::parse(payload)?;
        self.run(&request).await
    }

    /// Validates and executes a run.
    ///
    /// On shortage a `failed_insufficient_stock` run is persisted and
    /// `InsufficientStock { run_id: Some(..) }` is returned.
    pub async fn run(&self, request: &RunRequest) -> DbResult<RunRecord> {
        self.settings.ensure_writable()?;

        let plan = self.validate_run(request).await?;
        if !plan.is_executable() {
            return Err(self.record_failure(&plan, plan.shortages.clone()).await);
        }
        self.execute_run(&plan).await
    }

    /// Executes a plan in one transaction.
    pub async fn execute_run(&self, plan: &RunPlan) -> DbResult<RunRecord> {
        self.settings.ensure_writable()?;

        let work = plan.clone();
        let result = run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move { execute_in(conn, &work, Utc::now()).await })
        })
        .await;

        let run_id = match result {
            Ok(run_id) => run_id,
            Err(DbError::Core(CoreError::InsufficientStock { shortages, .. })) => {
                return Err(self.record_failure(plan, shortages).await);
            }
            Err(err) => return Err(err),
        };

        let record = self.get_run(run_id).await?;
        if let Some(RunMeta::Completed {
            cost_inputs_cents,
            per_output_cents,
            output_batch_id,
            ..
        }) = &record.meta
        {
            info!(
                run_id,
                output_item_id = plan.output_item_id,
                output_qty_base = plan.output_qty_base,
                cost_inputs_cents,
                per_output_cents,
                "Manufacturing run completed"
            );
            self.settings
                .journal(JournalEntry::manufacturing(
                    "run_completed",
                    json!({
                        "run_id": run_id,
                        "recipe_id": plan.recipe_id,
                        "output_item_id": plan.output_item_id,
                        "output_qty_base": plan.output_qty_base,
                        "cost_inputs_cents": cost_inputs_cents,
                        "per_output_cents": per_output_cents,
                        "output_batch_id": output_batch_id,
                    }),
                ))
                .await;
        }
        Ok(record)
    }

    pub async fn get_run(&self, id: i64) -> DbResult<RunRecord> {
        let run = run::fetch(&self.pool, id).await?;
        let meta = run.decode_meta()?;
        Ok(RunRecord { run, meta })
    }

    /// Runs, newest first.
    pub async fn list_runs(&self, limit: u32) -> DbResult<Vec<RunRecord>> {
        run::list(&self.pool, limit)
            .await?
            .into_iter()
            .map(|run| {
                let meta = run.decode_meta()?;
                Ok(RunRecord { run, meta })
            })
            .collect()
    }

    /// Persists a failed run and builds the error to hand back.
    async fn record_failure(&self, plan: &RunPlan, shortages: Vec<Shortage>) -> DbError {
        let meta = match serde_json::to_string(&RunMeta::FailedInsufficientStock {
            shortages: shortages.clone(),
        }) {
            Ok(meta) => meta,
            Err(err) => return err.into(),
        };
        let new = NewRun {
            recipe_id: plan.recipe_id,
            output_item_id: plan.output_item_id,
            output_qty: plan.output_qty_base,
            status: RunStatus::FailedInsufficientStock,
            notes: plan.notes.clone(),
            meta: Some(meta),
        };

        let run_id = match run_in_transaction(&self.pool, move |conn| {
            Box::pin(async move { run::insert(conn, &new, Utc::now()).await })
        })
        .await
        {
            Ok(run_id) => run_id,
            Err(err) => return err,
        };

        warn!(run_id, shortages = shortages.len(), "Manufacturing run failed: insufficient stock");
        self.settings
            .journal(JournalEntry::manufacturing(
                "run_failed",
                json!({ "run_id": run_id, "shortages": shortages }),
            ))
            .await;

        CoreError::InsufficientStock {
            shortages,
            run_id: Some(run_id),
        }
        .into()
    }
}

/// Body of a run. Everything here shares the caller's transaction.
async fn execute_in(conn: &mut SqliteConnection, plan: &RunPlan, at: DateTime<Utc>) -> DbResult<i64> {
    let run_id = run::insert(
        conn,
        &NewRun {
            recipe_id: plan.recipe_id,
            output_item_id: plan.output_item_id,
            output_qty: plan.output_qty_base,
            status: RunStatus::Created,
            notes: plan.notes.clone(),
            meta: None,
        },
        at,
    )
    .await?;
    let source_id = run_id.to_string();

    let mut rollup = CostRollup::new();
    for component in &plan.components {
        if component.is_optional {
            let available = batch::sum_remaining(&mut *conn, component.item_id).await?;
            if available < component.required {
                debug!(run_id, item_id = component.item_id, available, "Optional component skipped");
                continue;
            }
        }

        let movements = consume_fifo_in(
            conn,
            component.item_id,
            component.required,
            SourceKind::Manufacturing,
            Some(source_id.as_str()),
            at,
        )
        .await?;
        for movement in &movements {
            rollup.record(
                component.item_id,
                movement.batch_id.unwrap_or_default(),
                -movement.qty_change,
                movement.unit_cost_cents.unwrap_or(0),
                component.multiplier,
            );
        }
    }

    let per_output_cents = rollup.per_output_cents(plan.output_qty_base, plan.output_multiplier)?;
    let output = add_batch_in(
        conn,
        NewBatch {
            item_id: plan.output_item_id,
            qty_base: plan.output_qty_base,
            unit_cost_cents: per_output_cents,
            source_kind: SourceKind::Manufacturing,
            source_id: Some(source_id),
        },
        at,
    )
    .await?;

    let meta = rollup.into_meta(plan.output_qty_base, per_output_cents, output.batch_id);
    run::mark_completed(conn, run_id, &serde_json::to_string(&meta)?, at).await?;

    Ok(run_id)
}

// =============================================================================
// Unit Tests
// =============================================================================
