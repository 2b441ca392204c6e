//! Process execution for build commands.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::{validate_args, BuildCommand};
use crate::{AppError, Result};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Executes permitted build commands.
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `cwd` as the working directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Security` if the command's arguments fail the
    /// allowlist, `AppError::Timeout` if it exceeds the configured bound, and
    /// `AppError::Io` if the process cannot be spawned.
    fn run<'a>(
        &'a self,
        cwd: &'a Path,
        command: &'a BuildCommand,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>>;
}

/// Spawns the container CLI directly, never through a shell.
#[derive(Debug, Clone)]
pub struct TokioCommandRunner {
    program: PathBuf,
    timeout: Duration,
}

impl TokioCommandRunner {
    /// Runner invoking `program` with a per-command `timeout`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn execute(&self, cwd: &Path, command: &BuildCommand) -> Result<CommandOutput> {
        let args = command.args();
        validate_args(&args)?;

        debug!(program = %self.program.display(), ?args, "spawning build command");

        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to spawn {}: {err}",
                    self.program.display()
                ))
            })?;

        // Dropping the child on timeout kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(command = command.name(), timeout = ?self.timeout, "build command timed out");
                AppError::Timeout(format!(
                    "{} exceeded {}s",
                    command.name(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::Io(format!("failed to wait for {}: {err}", command.name())))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(
        &'a self,
        cwd: &'a Path,
        command: &'a BuildCommand,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>> {
        Box::pin(self.execute(cwd, command))
    }
}
