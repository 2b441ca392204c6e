//! Path validation against the allowlisted roots.
//!
//! Untrusted paths are joined onto the workspace root, normalized, and
//! resolved through any existing symlinks before being compared
//! component-wise with the canonical allowlisted roots. Component-wise
//! comparison means `/work/src-evil/x` never matches the root `/work/src`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Validates candidate write targets.
#[derive(Debug, Clone)]
pub struct PathGuard {
    workspace_root: PathBuf,
    allowed_roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Build a guard for `workspace_root` permitting writes beneath `allowed_roots`.
    ///
    /// Relative roots are resolved against the workspace root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the workspace root cannot be
    /// canonicalized or an allowlisted root cannot be resolved.
    pub fn new(workspace_root: &Path, allowed_roots: &[PathBuf]) -> Result<Self> {
        let workspace_root = workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace root invalid: {err}")))?;

        let allowed_roots = allowed_roots
            .iter()
            .map(|root| {
                let joined = normalize(&workspace_root.join(root))
                    .map_err(|err| AppError::Config(format!("allowlisted root invalid: {err}")))?;
                resolve_existing(&joined)
                    .map_err(|err| AppError::Config(format!("allowlisted root invalid: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            workspace_root,
            allowed_roots,
        })
    }

    /// Canonical workspace root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Canonical allowlisted roots.
    #[must_use]
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Resolve `candidate` to the absolute path that would be written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Security` if the path is empty, climbs above the
    /// file-system root, traverses an unresolvable symlink, or does not land
    /// strictly beneath one of the allowlisted roots.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf> {
        if candidate.trim().is_empty() {
            return Err(AppError::Security("empty path".into()));
        }
        if candidate.contains('\0') {
            return Err(AppError::Security("path contains NUL byte".into()));
        }

        let joined = self.workspace_root.join(candidate);
        let normalized = normalize(&joined)?;
        let resolved = resolve_existing(&normalized)?;

        let permitted = self
            .allowed_roots
            .iter()
            .any(|root| resolved.starts_with(root) && resolved != *root);

        if permitted {
            Ok(resolved)
        } else {
            Err(AppError::Security(format!(
                "{candidate} resolves outside allowed paths"
            )))
        }
    }

    /// Whether `candidate` may be written.
    #[must_use]
    pub fn is_allowed(&self, candidate: &str) -> bool {
        self.resolve(candidate).is_ok()
    }
}

/// Lexically remove `.` and `..` components from an absolute path.
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() || normalized.as_os_str().is_empty() {
                    return Err(AppError::Security(
                        "path attempts to escape the file-system root".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }
    Ok(normalized)
}

/// Canonicalize the longest existing ancestor of `path` and re-append the rest.
///
/// Dangling symlinks count as existing so they fail canonicalization instead
/// of being silently followed on write.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut rest = Vec::new();

    while fs::symlink_metadata(existing).is_err() {
        let Some(name) = existing.file_name() else {
            break;
        };
        rest.push(name.to_owned());
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|err| AppError::Security(format!("cannot resolve {}: {err}", existing.display())))?;
    for name in rest.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
