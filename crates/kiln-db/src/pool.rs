//! # Database Pool Management
//!
//! Connection pool creation, configuration and service access.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Handle                                    │
//! │                                                                         │
//! │  DbConfig::new(path).writes_enabled(true).journal(...)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ├── pool: SqlitePool                                             │
//! │       └── settings: LedgerSettings { writes_enabled, journal }         │
//! │                │                                                        │
//! │                │ cloned into every service                              │
//! │                ▼                                                        │
//! │  ┌────────────┐ ┌──────────────────┐ ┌──────────────┐ ┌────────────┐   │
//! │  │BatchLedger │ │ManufacturingEngine│ │FinanceLedger │ │ Integrity  │   │
//! │  └────────────┘ └──────────────────┘ └──────────────┘ └────────────┘   │
//! │                                                                         │
//! │  Two Database values in one process never share settings.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled so readers don't block
//! the single writer.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use kiln_core::CoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::dashboard::Dashboard;
use crate::error::{DbError, DbResult};
use crate::finance::FinanceLedger;
use crate::integrity::IntegrityValidator;
use crate::journal::{record_best_effort, AuditJournal, JournalEntry, NoopJournal};
use crate::ledger::BatchLedger;
use crate::manufacturing::ManufacturingEngine;
use crate::migrations;
use crate::repository::item::ItemRepository;
use crate::repository::recipe::RecipeRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/kiln.db")
///     .max_connections(5)
///     .writes_enabled(false);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a writer waits for another writer's transaction.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,

    /// When false every mutating service call fails with `WritesDisabled`.
    /// Default: true
    pub writes_enabled: bool,

    /// Audit sink invoked after each commit.
    /// Default: `NoopJournal`
    pub journal: Arc<dyn AuditJournal>,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
            writes_enabled: true,
            journal: Arc::new(NoopJournal),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Enables or disables ledger writes.
    pub fn writes_enabled(mut self, enabled: bool) -> Self {
        self.writes_enabled = enabled;
        self
    }

    /// Sets the audit journal.
    pub fn journal(mut self, journal: Arc<dyn AuditJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let db = Database::new(DbConfig::in_memory()).await?;
    /// // Database is isolated, perfect for tests
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
            writes_enabled: true,
            journal: Arc::new(NoopJournal),
        }
    }
}

// =============================================================================
// Ledger Settings
// =============================================================================

/// Per-handle switches every service carries.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub writes_enabled: bool,
    pub journal: Arc<dyn AuditJournal>,
}

impl LedgerSettings {
    /// Fails before any write when the handle is read-only.
    pub fn ensure_writable(&self) -> DbResult<()> {
        if self.writes_enabled {
            Ok(())
        } else {
            Err(CoreError::WritesDisabled.into())
        }
    }

    /// Post-commit journaling; failures are logged and dropped.
    ///
    /// The append runs on the blocking pool so file I/O never stalls the
    /// async workers.
    pub async fn journal(&self, entry: JournalEntry) {
        let journal = Arc::clone(&self.journal);
        let action = entry.action.clone();
        let appended =
            tokio::task::spawn_blocking(move || record_best_effort(journal.as_ref(), entry)).await;
        if let Err(err) = appended {
            warn!(action = %action, error = %err, "Audit journal task failed; ignoring");
        }
    }
}

impl From<&DbConfig> for LedgerSettings {
    fn from(config: &DbConfig) -> Self {
        LedgerSettings {
            writes_enabled: config.writes_enabled,
            journal: Arc::clone(&config.journal),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository and service access.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./kiln.db")).await?;
/// let batch_id = db.ledger().stock_in(item_id, "4", "ea", 10, None).await?;
/// let summary = db.finance().profit_summary(window).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,

    settings: LedgerSettings,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous
    ///    - Foreign keys enabled
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            writes_enabled = config.writes_enabled,
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // SQLite has them disabled by default for backwards compatibility
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            settings: LedgerSettings::from(&config),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Item CRUD.
    pub fn items(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone(), self.settings.clone())
    }

    /// Recipe CRUD.
    pub fn recipes(&self) -> RecipeRepository {
        RecipeRepository::new(self.pool.clone(), self.settings.clone())
    }

    /// FIFO batch ledger and stock mutations.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let on_hand = db.ledger().on_hand_qty(item_id).await?;
    /// ```
    pub fn ledger(&self) -> BatchLedger {
        BatchLedger::new(self.pool.clone(), self.settings.clone())
    }

    /// Manufacturing validate/execute.
    pub fn manufacturing(&self) -> ManufacturingEngine {
        ManufacturingEngine::new(self.pool.clone(), self.settings.clone())
    }

    /// Cash events and profit reports.
    pub fn finance(&self) -> FinanceLedger {
        FinanceLedger::new(self.pool.clone(), self.settings.clone())
    }

    /// Landing-screen aggregates.
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::new(self.pool.clone(), self.settings.clone())
    }

    /// Read-only consistency scans.
    pub fn integrity(&self) -> IntegrityValidator {
        IntegrityValidator::new(self.pool.clone())
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DbConfig::in_memory();
        let db = Database::new(config).await.unwrap();

        assert!(db.health_check().await);
        assert!(db.settings().writes_enabled);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .writes_enabled(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.writes_enabled);
    }

    #[tokio::test]
    async fn test_instances_keep_independent_settings() {
        let writable = Database::new(DbConfig::in_memory()).await.unwrap();
        let readonly = Database::new(DbConfig::in_memory().writes_enabled(false))
            .await
            .unwrap();

        assert!(writable.settings().ensure_writable().is_ok());
        let err = readonly.settings().ensure_writable().unwrap_err();
        assert_eq!(err.code(), "writes_disabled");
    }
}
