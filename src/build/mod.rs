//! Container rebuild: the closed set of permitted commands and the rebuild
//! sequence run after a delivery writes files.

pub mod health;
pub mod runner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::models::outcome::{BuildStep, BuildStepResult, StepStatus};
use crate::{AppError, Result};

pub use health::{HealthProbe, HttpHealthProbe};
pub use runner::{CommandOutput, CommandRunner, TokioCommandRunner};

/// Longest stderr/stdout excerpt carried into a report.
pub const EXCERPT_LIMIT: usize = 500;

const COMPOSE_SUBCOMMANDS: &[&str] = &["up", "down", "build", "ps"];

const ALLOWED_PREFIXES: &[&[&str]] = &[
    &["ps"],
    &["images"],
    &["image", "ls"],
    &["image", "prune"],
    &["image", "rm"],
    &["rmi"],
    &["system", "prune"],
];

/// Every operation the build runner may execute. Each variant maps to a
/// fixed argument vector; nothing is ever passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCommand {
    /// `compose -f <file> down --remove-orphans`
    ComposeDown {
        /// Compose file.
        compose_file: PathBuf,
    },
    /// `compose -f <file> build`
    ComposeBuild {
        /// Compose file.
        compose_file: PathBuf,
    },
    /// `compose -f <file> up -d --build`
    ComposeUp {
        /// Compose file.
        compose_file: PathBuf,
    },
    /// `compose -f <file> ps`
    ComposePs {
        /// Compose file.
        compose_file: PathBuf,
    },
    /// `images`
    ImageList,
    /// `image prune -f`
    ImagePrune,
    /// `system prune -f`
    SystemPrune,
    /// `rmi <image>`
    ImageRemove {
        /// Image reference.
        image: String,
    },
}

impl BuildCommand {
    /// Argument vector passed to the container CLI.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let compose = |file: &Path, tail: &[&str]| {
            let mut args = vec![
                "compose".to_owned(),
                "-f".to_owned(),
                file.to_string_lossy().into_owned(),
            ];
            args.extend(tail.iter().map(|s| (*s).to_owned()));
            args
        };
        let fixed = |parts: &[&str]| parts.iter().map(|s| (*s).to_owned()).collect();

        match self {
            Self::ComposeDown { compose_file } => compose(compose_file, &["down", "--remove-orphans"]),
            Self::ComposeBuild { compose_file } => compose(compose_file, &["build"]),
            Self::ComposeUp { compose_file } => compose(compose_file, &["up", "-d", "--build"]),
            Self::ComposePs { compose_file } => compose(compose_file, &["ps"]),
            Self::ImageList => fixed(&["images"]),
            Self::ImagePrune => fixed(&["image", "prune", "-f"]),
            Self::SystemPrune => fixed(&["system", "prune", "-f"]),
            Self::ImageRemove { image } => vec!["rmi".to_owned(), image.clone()],
        }
    }

    /// Short name used in logs and audit records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ComposeDown { .. } => "compose_down",
            Self::ComposeBuild { .. } => "compose_build",
            Self::ComposeUp { .. } => "compose_up",
            Self::ComposePs { .. } => "compose_ps",
            Self::ImageList => "image_list",
            Self::ImagePrune => "image_prune",
            Self::SystemPrune => "system_prune",
            Self::ImageRemove { .. } => "image_remove",
        }
    }
}

/// Check an argument vector against the allowed command prefixes.
///
/// # Errors
///
/// Returns `AppError::Security` if the vector does not start with a
/// permitted prefix, if an image removal target looks like a flag, or if any
/// argument contains a NUL byte.
pub fn validate_args(args: &[String]) -> Result<()> {
    if args.iter().any(|a| a.contains('\0')) {
        return Err(AppError::Security("argument contains NUL byte".into()));
    }

    let words: Vec<&str> = args.iter().map(String::as_str).collect();

    if let Some(rest) = words.strip_prefix(&["compose"]) {
        let sub = match rest {
            ["-f", _file, sub, ..] => sub,
            [sub, ..] => sub,
            [] => return Err(AppError::Security("empty compose command".into())),
        };
        return if COMPOSE_SUBCOMMANDS.contains(sub) {
            Ok(())
        } else {
            Err(AppError::Security(format!(
                "compose subcommand '{sub}' not allowed"
            )))
        };
    }

    let Some(prefix) = ALLOWED_PREFIXES.iter().find(|p| words.starts_with(p)) else {
        return Err(AppError::Security(format!(
            "command '{}' not allowed",
            words.join(" ")
        )));
    };

    if matches!(*prefix, ["rmi"] | ["image", "rm"]) {
        let targets = &words[prefix.len()..];
        if targets.is_empty() || targets.iter().any(|t| t.starts_with('-')) {
            return Err(AppError::Security(
                "image removal requires plain image references".into(),
            ));
        }
    }

    Ok(())
}

/// Truncate `text` to at most `limit` characters on a char boundary.
#[must_use]
pub fn excerpt(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_owned(),
    }
}

/// Map a command result to a step status.
#[must_use]
pub fn step_status(result: &Result<CommandOutput>) -> StepStatus {
    match result {
        Ok(out) if out.success => {
            let detail = excerpt(&out.stdout, EXCERPT_LIMIT);
            StepStatus::Ok {
                detail: (!detail.is_empty()).then_some(detail),
            }
        }
        Ok(out) => StepStatus::Failed {
            exit_code: out.exit_code,
            stderr: excerpt(&out.stderr, EXCERPT_LIMIT),
        },
        Err(AppError::Timeout(_)) => StepStatus::TimedOut,
        Err(err) => StepStatus::Error {
            message: err.to_string(),
        },
    }
}

/// Runs the rebuild sequence: cleanup, prune, build, verify, health probe.
pub struct BuildRunner {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn HealthProbe>,
    workspace_root: PathBuf,
    compose_file: PathBuf,
    health_url: Option<String>,
}

impl BuildRunner {
    /// Construct a runner operating in `workspace_root` on `compose_file`.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn HealthProbe>,
        workspace_root: PathBuf,
        compose_file: PathBuf,
        health_url: Option<String>,
    ) -> Self {
        Self {
            runner,
            probe,
            workspace_root,
            compose_file,
            health_url,
        }
    }

    async fn exec(&self, step: BuildStep, command: BuildCommand) -> BuildStepResult {
        let name = command.name();
        let result = self.runner.run(&self.workspace_root, &command).await;
        let status = step_status(&result);
        if status.is_ok() {
            info!(step = ?step, command = name, "build step ok");
        } else {
            warn!(step = ?step, command = name, ?status, "build step did not succeed");
        }
        BuildStepResult::new(step, status)
    }

    /// Run every step, returning results in execution order.
    ///
    /// Cleanup, prune, verify, and the health probe are best-effort. A
    /// failed or timed-out build step skips verify and the health probe.
    pub async fn rebuild(&self) -> Vec<BuildStepResult> {
        async {
            if !self.compose_file.exists() {
                let reason = format!("no compose file at {}", self.compose_file.display());
                warn!(%reason, "skipping rebuild");
                return [
                    BuildStep::Cleanup,
                    BuildStep::Prune,
                    BuildStep::Build,
                    BuildStep::Verify,
                    BuildStep::Health,
                ]
                .into_iter()
                .map(|step| {
                    BuildStepResult::new(
                        step,
                        StepStatus::Skipped {
                            reason: reason.clone(),
                        },
                    )
                })
                .collect();
            }

            let compose_file = self.compose_file.clone();
            let mut results = Vec::with_capacity(5);

            results.push(
                self.exec(
                    BuildStep::Cleanup,
                    BuildCommand::ComposeDown {
                        compose_file: compose_file.clone(),
                    },
                )
                .await,
            );
            results.push(self.exec(BuildStep::Prune, BuildCommand::ImagePrune).await);

            let build = self
                .exec(
                    BuildStep::Build,
                    BuildCommand::ComposeUp {
                        compose_file: compose_file.clone(),
                    },
                )
                .await;
            let build_ok = build.status.is_ok();
            results.push(build);

            if !build_ok {
                for step in [BuildStep::Verify, BuildStep::Health] {
                    results.push(BuildStepResult::new(
                        step,
                        StepStatus::Skipped {
                            reason: "build failed".into(),
                        },
                    ));
                }
                return results;
            }

            results.push(
                self.exec(BuildStep::Verify, BuildCommand::ComposePs { compose_file })
                    .await,
            );
            results.push(self.health().await);
            results
        }
        .instrument(info_span!("rebuild", workspace = %self.workspace_root.display()))
        .await
    }

    async fn health(&self) -> BuildStepResult {
        let Some(url) = self.health_url.as_deref() else {
            return BuildStepResult::new(
                BuildStep::Health,
                StepStatus::Skipped {
                    reason: "no health url configured".into(),
                },
            );
        };

        let status = match self.probe.probe(url).await {
            Ok(code) if code < 400 => StepStatus::Ok {
                detail: Some(format!("HTTP {code}")),
            },
            Ok(code) => StepStatus::Error {
                message: format!("HTTP {code}"),
            },
            Err(AppError::Timeout(_)) => StepStatus::TimedOut,
            Err(err) => StepStatus::Error {
                message: err.to_string(),
            },
        };
        info!(url, ?status, "health probe finished");
        BuildStepResult::new(BuildStep::Health, status)
    }
}
