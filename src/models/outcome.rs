//! Outcome records produced while a delivery moves through the pipeline.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Pipeline stages a message passes through, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    /// Message accepted for handling.
    Received,
    /// Extractor ran.
    Extracted,
    /// At least one artifact was written; build started.
    BuildRun,
    /// Build step succeeded.
    Verified,
    /// Build step failed or timed out.
    BuildFailed,
    /// Build sequence was planned but no step ran (no compose file).
    BuildSkipped,
    /// Outcome report composed and sent (or attempted).
    Reported,
    /// Identity recorded as processed.
    Resolved,
}

/// Result of placing one artifact on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Content written.
    Written {
        /// Requested (untrusted) path.
        path: String,
        /// Bytes written.
        bytes: usize,
    },
    /// Path guard rejected the target.
    Blocked {
        /// Requested (untrusted) path.
        path: String,
        /// Why the guard refused.
        reason: String,
    },
    /// No target path could be determined.
    Skipped {
        /// Size of the discarded content.
        bytes: usize,
    },
    /// Path approved but the write itself failed.
    Failed {
        /// Requested (untrusted) path.
        path: String,
        /// I/O error text.
        error: String,
    },
}

impl FileOutcome {
    /// Whether the artifact reached disk.
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }

    /// Whether the guard refused the artifact.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

impl Display for FileOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Written { path, bytes } => write!(f, "WRITTEN: {path} ({bytes} bytes)"),
            Self::Blocked { path, reason } => write!(f, "BLOCKED: {path} ({reason})"),
            Self::Skipped { bytes } => {
                write!(f, "SKIPPED: code block with no filepath ({bytes} bytes)")
            }
            Self::Failed { path, error } => write!(f, "FAILED: {path} ({error})"),
        }
    }
}

/// Steps of the rebuild sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    /// Stop running containers.
    Cleanup,
    /// Drop dangling images.
    Prune,
    /// Rebuild and start.
    Build,
    /// List running containers.
    Verify,
    /// HTTP probe against the rebuilt service.
    Health,
}

impl BuildStep {
    /// Human label used in reports.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Cleanup => "Stopping containers",
            Self::Prune => "Pruning images",
            Self::Build => "Building and starting",
            Self::Verify => "Checking containers",
            Self::Health => "Health check",
        }
    }
}

/// Outcome of one build step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Step succeeded.
    Ok {
        /// Optional detail (container listing, HTTP status).
        detail: Option<String>,
    },
    /// Non-zero exit.
    Failed {
        /// Exit code when the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error excerpt.
        stderr: String,
    },
    /// Step exceeded its timeout.
    TimedOut,
    /// Step could not be run (spawn failure, refused command, unreachable host).
    Error {
        /// Error text.
        message: String,
    },
    /// Step deliberately not run.
    Skipped {
        /// Why it was skipped.
        reason: String,
    },
}

impl StepStatus {
    /// Whether the step completed successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Recorded result of a single build step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildStepResult {
    /// Which step.
    pub step: BuildStep,
    /// How it ended.
    pub status: StepStatus,
}

impl BuildStepResult {
    /// Construct a result.
    #[must_use]
    pub fn new(step: BuildStep, status: StepStatus) -> Self {
        Self { step, status }
    }
}

impl Display for BuildStepResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = self.step.label();
        match &self.status {
            StepStatus::Ok { detail: Some(d) } if self.step == BuildStep::Health => {
                write!(f, "{label}: {d}")
            }
            StepStatus::Ok { .. } => write!(f, "{label}: OK"),
            StepStatus::Failed { exit_code, .. } => match exit_code {
                Some(code) => write!(f, "{label}: FAIL (exit {code})"),
                None => write!(f, "{label}: FAIL (terminated)"),
            },
            StepStatus::TimedOut => write!(f, "{label}: TIMEOUT"),
            StepStatus::Error { message } => write!(f, "{label}: ERROR ({message})"),
            StepStatus::Skipped { reason } => write!(f, "{label}: SKIPPED ({reason})"),
        }
    }
}

/// Everything known about one handled message, sent back as the outcome report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Message identity.
    pub message_id: String,
    /// Subject of the originating message.
    pub subject: String,
    /// Per-artifact outcomes, in extraction order.
    pub files: Vec<FileOutcome>,
    /// Build step results, in execution order; empty when no build ran.
    pub build: Vec<BuildStepResult>,
    /// Non-fatal notes.
    pub warnings: Vec<String>,
}

impl DeliveryReport {
    /// Empty report for a message.
    #[must_use]
    pub fn new(message_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Number of artifacts written.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_written()).count()
    }

    /// Number of artifacts refused by the path guard.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_blocked()).count()
    }

    /// Whether the build step ran and did not succeed.
    #[must_use]
    pub fn build_failed(&self) -> bool {
        self.build.iter().any(|r| {
            r.step == BuildStep::Build
                && !matches!(r.status, StepStatus::Ok { .. } | StepStatus::Skipped { .. })
        })
    }

    /// Whether the build step itself was run, whatever its result.
    #[must_use]
    pub fn build_ran(&self) -> bool {
        self.build
            .iter()
            .any(|r| r.step == BuildStep::Build && !matches!(r.status, StepStatus::Skipped { .. }))
    }

    /// The failed build step as an error, for logging and audit.
    #[must_use]
    pub fn build_error(&self) -> Option<AppError> {
        if !self.build_failed() {
            return None;
        }
        self.build
            .iter()
            .find(|r| r.step == BuildStep::Build)
            .map(|r| match &r.status {
                StepStatus::Failed { stderr, .. } if !stderr.is_empty() => {
                    AppError::Build(format!("{r}: {stderr}"))
                }
                _ => AppError::Build(r.to_string()),
            })
    }

    /// Status recorded for `step`, if it ran.
    #[must_use]
    pub fn step(&self, step: BuildStep) -> Option<&StepStatus> {
        self.build.iter().find(|r| r.step == step).map(|r| &r.status)
    }
}

/// What the pipeline did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Stages visited, in order.
    pub stages: Vec<DeliveryStage>,
    /// Composed report.
    pub report: DeliveryReport,
    /// Whether the report reached the message source.
    pub report_sent: bool,
    /// Whether the remote status was set to resolved.
    pub remote_resolved: bool,
}

impl DeliveryOutcome {
    /// Final stage reached.
    #[must_use]
    pub fn final_stage(&self) -> Option<DeliveryStage> {
        self.stages.last().copied()
    }
}
