//! # Demo Workshop Seeder
//!
//! Builds a small paper-plane workshop for local development.
//!
//! ## Usage
//! ```bash
//! # Seed ./kiln_dev.db
//! cargo run -p kiln-db --bin seed
//!
//! # Specify database path
//! cargo run -p kiln-db --bin seed -- --db ./data/kiln.db
//!
//! # Use a config file (KILN_* environment overrides still apply)
//! cargo run -p kiln-db --bin seed -- --config ./kiln.toml
//! ```
//!
//! ## Generated Data
//! - Paper (count), Glue (volume), Paper plane (count, product)
//! - One purchase of paper and glue in two FIFO lots
//! - A "Paper plane" recipe and one run of 4 planes
//! - A cash sale of 2 planes

use std::env;
use std::path::PathBuf;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use kiln_core::finance::ProfitWindow;
use kiln_core::manufacturing::RunRequest;
use kiln_core::Dimension;
use kiln_db::finance::SaleRequest;
use kiln_db::ledger::PurchaseLine;
use kiln_db::{Database, LedgerConfig, NewItem, NewRecipe, NewRecipeComponent};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kiln=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kiln Demo Workshop Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./kiln_dev.db)");
                println!("  -c, --config <PATH>   kiln.toml to load");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => LedgerConfig::load(Some(path))?,
        None => LedgerConfig::default(),
    };
    config.database.path = Some(
        db_path
            .or(config.database.path.take())
            .unwrap_or_else(|| PathBuf::from("./kiln_dev.db")),
    );

    println!("Kiln Demo Workshop Seeder");
    println!("=========================");
    println!("Database: {}", config.database_path().display());
    println!();

    let db = Database::new(config.into_db_config()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.items().list().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} items", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Items
    let paper = db.items().create(NewItem::new("Paper", Dimension::Count)).await?;
    let glue = db
        .items()
        .create(NewItem::new("Glue", Dimension::Volume).uom("ml"))
        .await?;
    let plane = db
        .items()
        .create(
            NewItem::new("Paper plane", Dimension::Count)
                .price_cents(250)
                .product(),
        )
        .await?;
    println!("✓ Created 3 items");

    // Two lots of paper so FIFO has something to walk
    db.ledger()
        .purchase(
            vec![
                PurchaseLine {
                    item_id: paper.id,
                    quantity_decimal: "8".into(),
                    uom: "ea".into(),
                    unit_cost_cents: 10,
                },
                PurchaseLine {
                    item_id: glue.id,
                    quantity_decimal: "0.5".into(),
                    uom: "l".into(),
                    unit_cost_cents: 2,
                },
            ],
            None,
        )
        .await?;
    db.ledger().stock_in(paper.id, "8", "ea", 20, None).await?;
    println!("✓ Stocked paper (2 lots) and glue");

    let recipe = db
        .recipes()
        .create(NewRecipe {
            name: "Paper plane".into(),
            output_item_id: plane.id,
            quantity_decimal: "1".into(),
            uom: "ea".into(),
            notes: Some("Fold, glue the nose".into()),
            components: vec![
                NewRecipeComponent {
                    item_id: paper.id,
                    quantity_decimal: "3".into(),
                    uom: "ea".into(),
                    is_optional: false,
                },
                NewRecipeComponent {
                    item_id: glue.id,
                    quantity_decimal: "5".into(),
                    uom: "ml".into(),
                    is_optional: true,
                },
            ],
        })
        .await?;
    println!("✓ Created recipe '{}'", recipe.recipe.name);

    let run = db
        .manufacturing()
        .run(&RunRequest::Recipe {
            recipe_id: recipe.recipe.id,
            quantity_decimal: "4".into(),
            uom: "ea".into(),
            notes: None,
        })
        .await?;
    println!("✓ Manufacturing run #{} {:?}", run.run.id, run.run.status);

    let sale = db
        .finance()
        .record_sale(SaleRequest {
            item_id: plane.id,
            quantity_decimal: "2".into(),
            uom: "ea".into(),
            unit_price_cents: None,
            notes: None,
            created_at: None,
        })
        .await?;
    println!(
        "✓ Sold 2 planes for {}¢ (COGS {}¢)",
        sale.cash_event.amount_cents, sale.cogs_cents
    );

    let today = Utc::now().date_naive();
    let summary = db
        .finance()
        .profit_summary(ProfitWindow::from_dates(today, today)?)
        .await?;
    println!();
    println!(
        "Today: revenue {}¢, COGS {}¢, margin {}%",
        summary.net_revenue_cents, summary.cogs_cents, summary.margin_percent
    );

    let valuation = db.ledger().valuation(None).await?;
    println!("Inventory value: {}¢", valuation.total_value_cents);

    let report = db.integrity().run().await?;
    println!(
        "Integrity: {}",
        if report.is_clean() { "clean" } else { "issues found" }
    );

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
