//! Guarded, atomic file writing.
//!
//! Validates the target path with the [`PathGuard`], creates parent
//! directories as needed, and writes content atomically via
//! `tempfile::NamedTempFile::persist()` to avoid partial writes. Existing
//! files are overwritten unconditionally and keep their permissions; new
//! files are created world-readable so container builds can read them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::PathGuard;
use crate::models::artifact::Artifact;
use crate::models::outcome::FileOutcome;
use crate::{AppError, Result};

/// Mode given to files that did not exist before the write.
#[cfg(unix)]
const NEW_FILE_MODE: u32 = 0o644;

/// Summary of a completed file write operation.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes_written: usize,
    /// Hex SHA-256 of the written content.
    pub sha256: String,
}

/// Writes artifacts beneath the allowlisted roots. The guard check is part of
/// every write and cannot be bypassed.
#[derive(Debug, Clone)]
pub struct FileWriter {
    guard: PathGuard,
}

impl FileWriter {
    /// Wrap `guard`.
    #[must_use]
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// The guard consulted before every write.
    #[must_use]
    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Write `content` to the untrusted relative `target`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Security` if the guard rejects the path and
    /// `AppError::Io` on directory creation, temp file write, or rename
    /// failure.
    pub fn write_full_file(&self, target: &str, content: &str) -> Result<WriteSummary> {
        let validated = self.guard.resolve(target)?;

        if validated.is_dir() {
            return Err(AppError::Io(format!(
                "{} is a directory",
                validated.display()
            )));
        }

        let parent = validated
            .parent()
            .ok_or_else(|| AppError::Io("file path has no parent directory".into()))?;

        fs::create_dir_all(parent).map_err(|err| {
            AppError::Io(format!(
                "failed to create parent directories for {}: {err}",
                validated.display()
            ))
        })?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

        carry_permissions(tmp.as_file(), &validated).map_err(|err| {
            AppError::Io(format!("failed to set permissions on temporary file: {err}"))
        })?;

        let bytes = content.as_bytes();
        tmp.write_all(bytes)
            .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

        tmp.persist(&validated).map_err(|err| {
            AppError::Io(format!(
                "failed to persist file to {}: {err}",
                validated.display()
            ))
        })?;

        let sha256 = Sha256::digest(bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Ok(WriteSummary {
            path: validated,
            bytes_written: bytes.len(),
            sha256,
        })
    }

    /// Place one artifact, classifying the result instead of failing.
    ///
    /// Returns the outcome and, when written, the write summary.
    #[must_use]
    pub fn place(&self, artifact: &Artifact) -> (FileOutcome, Option<WriteSummary>) {
        let Some(path) = artifact.target_path.as_deref() else {
            return (
                FileOutcome::Skipped {
                    bytes: artifact.content.len(),
                },
                None,
            );
        };

        match self.write_full_file(path, &artifact.content) {
            Ok(summary) => (
                FileOutcome::Written {
                    path: path.to_owned(),
                    bytes: summary.bytes_written,
                },
                Some(summary),
            ),
            Err(AppError::Security(reason)) => (
                FileOutcome::Blocked {
                    path: path.to_owned(),
                    reason,
                },
                None,
            ),
            Err(err) => (
                FileOutcome::Failed {
                    path: path.to_owned(),
                    error: err.to_string(),
                },
                None,
            ),
        }
    }
}

/// Give the temporary file the permissions `target` has, or the default
/// mode when `target` does not exist yet.
fn carry_permissions(file: &fs::File, target: &Path) -> std::io::Result<()> {
    match fs::metadata(target) {
        Ok(meta) => file.set_permissions(meta.permissions()),
        Err(_) => set_new_file_mode(file),
    }
}

#[cfg(unix)]
fn set_new_file_mode(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(NEW_FILE_MODE))
}

#[cfg(not(unix))]
fn set_new_file_mode(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}
