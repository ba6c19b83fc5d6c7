//! # Ledger Configuration
//!
//! File and environment configuration for a ledger process.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KILN_DB_PATH=/var/lib/kiln/kiln.db                                 │
//! │     KILN_WRITES_ENABLED=false                                          │
//! │     KILN_JOURNAL_DIR=/var/log/kiln                                     │
//! │     KILN_MAX_CONNECTIONS=4                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiln/kiln.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.kiln.kiln/kiln.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     writes enabled, no journal, kiln.db in the platform data dir       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kiln.toml
//! [database]
//! path = "/var/lib/kiln/kiln.db"
//! max_connections = 5
//! writes_enabled = true
//!
//! [journal]
//! dir = "/var/log/kiln"
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::journal::JsonlJournal;
use crate::pool::DbConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `kiln.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// `false` opens the ledger read-only: every mutation is refused.
    #[serde(default = "default_true")]
    pub writes_enabled: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            writes_enabled: true,
        }
    }
}

/// `[journal]` section. No directory means no journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub journal: JournalSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kiln.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::Invalid("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid(
                "min_connections must not exceed max_connections".into(),
            ));
        }
        if matches!(&self.database.path, Some(p) if p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("database path must not be empty".into()));
        }
        Ok(())
    }

    /// Applies `KILN_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KILN_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("KILN_WRITES_ENABLED") {
            match parse_flag(&value) {
                Some(enabled) => {
                    debug!(enabled, "Overriding writes_enabled from environment");
                    self.database.writes_enabled = enabled;
                }
                None => warn!(value = %value, "Unknown KILN_WRITES_ENABLED value"),
            }
        }

        if let Some(dir) = lookup("KILN_JOURNAL_DIR") {
            self.journal.dir = Some(PathBuf::from(dir));
        }

        if let Some(max) = lookup("KILN_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Invalid KILN_MAX_CONNECTIONS value"),
            }
        }
    }

    /// Path of the SQLite file this config points at.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("com", "kiln", "kiln")
                    .map(|dirs| dirs.data_dir().join("kiln.db"))
            })
            .unwrap_or_else(|| PathBuf::from("kiln.db"))
    }

    /// Builds the pool configuration.
    pub fn into_db_config(self) -> DbConfig {
        let mut config = DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .writes_enabled(self.database.writes_enabled);

        if let Some(dir) = self.journal.dir {
            config = config.journal(Arc::new(JsonlJournal::new(dir)));
        }
        config
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kiln", "kiln")
            .map(|dirs| dirs.config_dir().join("kiln.toml"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.database.writes_enabled);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.journal.dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections_are_optional() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [database]
            path = "/tmp/kiln-test.db"
            writes_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/kiln-test.db")));
        assert!(!config.database.writes_enabled);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.journal, JournalSettings::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("KILN_DB_PATH", "/srv/kiln.db"),
            ("KILN_WRITES_ENABLED", "no"),
            ("KILN_JOURNAL_DIR", "/srv/journal"),
            ("KILN_MAX_CONNECTIONS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path(), PathBuf::from("/srv/kiln.db"));
        assert!(!config.database.writes_enabled);
        assert_eq!(config.journal.dir, Some(PathBuf::from("/srv/journal")));
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_validation() {
        let mut config = LedgerConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        config.database.max_connections = 2;
        config.database.min_connections = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_into_db_config() {
        let mut config = LedgerConfig::default();
        config.database.path = Some(PathBuf::from("/srv/kiln.db"));
        config.database.writes_enabled = false;

        let db_config = config.into_db_config();
        assert_eq!(db_config.database_path, PathBuf::from("/srv/kiln.db"));
        assert!(!db_config.writes_enabled);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("kiln-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("kiln.toml");

        let mut config = LedgerConfig::default();
        config.database.path = Some(dir.join("kiln.db"));
        config.journal.dir = Some(dir.join("journal"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: LedgerConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
