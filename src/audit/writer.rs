//! JSONL audit log writer.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{info, warn};

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

/// Append-only JSONL audit writer.
///
/// Appends one JSON object per line to a single file. The file handle is
/// opened lazily and guarded by a mutex so concurrent callers never
/// interleave partial lines.
pub struct JsonlAuditWriter {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<fs::File>>>,
}

impl JsonlAuditWriter {
    /// Construct a writer that appends to `path`.
    ///
    /// Creates the parent directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Audit`] if the directory cannot be created.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Audit(format!(
                    "failed to create audit log directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(None),
        })
    }

    /// Location of the audit file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<BufWriter<fs::File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                AppError::Audit(format!("failed to open audit log {}: {e}", path.display()))
            })?;
        Ok(BufWriter::new(file))
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Audit(format!("failed to serialize audit entry: {e}")))?;

        let mut guard = self
            .writer
            .lock()
            .map_err(|_| AppError::Audit("audit writer mutex poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(Self::open(&self.path)?);
        }

        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writeln!(writer, "{line}") {
                warn!("failed to write audit log entry: {e}");
                return Err(AppError::Audit(format!("audit write failed: {e}")));
            }
            if let Err(e) = writer.flush() {
                warn!("failed to flush audit log: {e}");
                return Err(AppError::Audit(format!("audit flush failed: {e}")));
            }
        }

        info!(event = ?entry.event, details = %entry.details, "audit");
        Ok(())
    }
}
