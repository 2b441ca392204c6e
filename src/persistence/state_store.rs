//! Durable de-duplication and failure ledger.
//!
//! The whole ledger is read into memory at startup and rewritten in full on
//! every mutation. Writes go to a temporary file in the same directory which
//! is then atomically renamed over the previous state, so a crash mid-write
//! leaves the last good file in place.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{AppError, Result};

/// `state.json` → `state.json.corrupt`.
fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// On-disk ledger shape: `{"processed": [...], "failed": {id: count}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ledger {
    /// Message identities already handled. Only grows.
    #[serde(default)]
    pub processed: BTreeSet<String>,
    /// Handling failures per message identity.
    #[serde(default)]
    pub failed: BTreeMap<String, u32>,
}

/// File-backed ledger shared by the poll loop and the pipeline.
///
/// All mutations hold the internal lock across the file rewrite, giving a
/// single-writer discipline even when mailboxes are polled concurrently.
pub struct StateStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl StateStore {
    /// Open the ledger at `path`, loading existing state if present.
    ///
    /// A missing file starts an empty ledger. A corrupt file is moved aside
    /// to `<name>.corrupt` and an empty ledger starts in its place; an
    /// unreadable file is logged and replaced on the next mutation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::State(format!(
                    "failed to create state directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let ledger = Self::load(&path);
        info!(
            path = %path.display(),
            processed = ledger.processed.len(),
            failed = ledger.failed.len(),
            "state store loaded"
        );

        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    fn load(path: &Path) -> Ledger {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ledger::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read state file, starting fresh");
                return Ledger::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(ledger) => ledger,
            Err(err) => {
                let backup = corrupt_path(path);
                match fs::rename(path, &backup) {
                    Ok(()) => warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        %err,
                        "corrupt state file moved aside, starting fresh"
                    ),
                    Err(rename_err) => warn!(
                        path = %path.display(),
                        %err,
                        %rename_err,
                        "corrupt state file could not be moved aside, starting fresh"
                    ),
                }
                Ledger::default()
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| AppError::State("state store mutex poisoned".into()))
    }

    fn save(&self, ledger: &Ledger) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| AppError::State("state file has no parent directory".into()))?;

        let json = serde_json::to_vec_pretty(ledger)
            .map_err(|err| AppError::State(format!("failed to serialize state: {err}")))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::State(format!("failed to create temporary file: {err}")))?;
        tmp.write_all(&json)
            .map_err(|err| AppError::State(format!("failed to write temporary file: {err}")))?;
        tmp.persist(&self.path).map_err(|err| {
            AppError::State(format!(
                "failed to persist state to {}: {err}",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `message_id` has already been handled.
    #[must_use]
    pub fn is_processed(&self, message_id: &str) -> bool {
        self.lock()
            .map(|ledger| ledger.processed.contains(message_id))
            .unwrap_or(false)
    }

    /// Record `message_id` as handled and clear its failure counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the ledger cannot be persisted. The
    /// in-memory ledger is updated regardless.
    pub fn mark_processed(&self, message_id: &str) -> Result<()> {
        let mut ledger = self.lock()?;
        ledger.processed.insert(message_id.to_owned());
        ledger.failed.remove(message_id);
        self.save(&ledger)
    }

    /// Increment the failure counter for `message_id`, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the ledger cannot be persisted.
    pub fn record_failure(&self, message_id: &str) -> Result<u32> {
        let mut ledger = self.lock()?;
        let count = ledger.failed.entry(message_id.to_owned()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        self.save(&ledger)?;
        Ok(count)
    }

    /// Handling failures recorded for `message_id`.
    #[must_use]
    pub fn failure_count(&self, message_id: &str) -> u32 {
        self.lock()
            .ok()
            .and_then(|ledger| ledger.failed.get(message_id).copied())
            .unwrap_or(0)
    }

    /// Copy of the current ledger.
    ///
    /// # Errors
    ///
    /// Returns `AppError::State` if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Ledger> {
        Ok(self.lock()?.clone())
    }
}
