//! # Audit Journal
//!
//! A best-effort side channel: one JSON line per committed mutation.
//!
//! ## Placement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  service call                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  run_in_transaction(...) ──► COMMIT                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  spawn_blocking(record_best_effort(journal, entry))                     │
//! │       ├── Ok  → line appended to <dir>/<stream>.jsonl                   │
//! │       └── Err → warn! and discard; the commit stands                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is journaled for a rolled-back unit of work.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// =============================================================================
// Entries
// =============================================================================

/// Which journal file an entry lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStream {
    Inventory,
    Manufacturing,
    Recipes,
}

impl JournalStream {
    pub fn file_name(self) -> &'static str {
        match self {
            JournalStream::Inventory => "inventory.jsonl",
            JournalStream::Manufacturing => "manufacturing.jsonl",
            JournalStream::Recipes => "recipes.jsonl",
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub stream: JournalStream,
    pub action: String,
    pub payload: Value,
}

impl JournalEntry {
    pub fn inventory(action: impl Into<String>, payload: Value) -> Self {
        Self::new(JournalStream::Inventory, action, payload)
    }

    pub fn manufacturing(action: impl Into<String>, payload: Value) -> Self {
        Self::new(JournalStream::Manufacturing, action, payload)
    }

    pub fn recipes(action: impl Into<String>, payload: Value) -> Self {
        Self::new(JournalStream::Recipes, action, payload)
    }

    fn new(stream: JournalStream, action: impl Into<String>, payload: Value) -> Self {
        JournalEntry {
            at: Utc::now(),
            stream,
            action: action.into(),
            payload,
        }
    }
}

// =============================================================================
// Journal Implementations
// =============================================================================

/// Sink for audit entries.
pub trait AuditJournal: Send + Sync + fmt::Debug {
    fn append(&self, entry: &JournalEntry) -> io::Result<()>;
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl AuditJournal for NoopJournal {
    fn append(&self, _entry: &JournalEntry) -> io::Result<()> {
        Ok(())
    }
}

/// Appends JSON lines under a directory, one file per stream.
#[derive(Debug)]
pub struct JsonlJournal {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonlJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonlJournal {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AuditJournal for JsonlJournal {
    fn append(&self, entry: &JournalEntry) -> io::Result<()> {
        let line = serde_json::to_string(entry)?;

        // A poisoned lock only means another append panicked mid-write.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(entry.stream.file_name());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;

        debug!(path = %path.display(), action = %entry.action, "Journal entry appended");
        Ok(())
    }
}

/// Appends an entry, logging and discarding any failure.
pub fn record_best_effort(journal: &dyn AuditJournal, entry: JournalEntry) {
    if let Err(err) = journal.append(&entry) {
        warn!(action = %entry.action, error = %err, "Audit journal append failed; ignoring");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
