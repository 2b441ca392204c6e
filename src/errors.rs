//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing, validation, or credential failure.
    Config(String),
    /// Network, DNS, or TLS failure talking to the message source.
    Transport(String),
    /// Credentials rejected by the message source.
    Auth(String),
    /// Malformed or unexpected payload at a system boundary.
    Protocol(String),
    /// Disallowed write path or build command.
    Security(String),
    /// Non-zero exit or timeout of the build step. The per-step result is
    /// carried in the report as a `StepStatus`; this variant is the summary
    /// used for logging.
    Build(String),
    /// A bounded operation did not finish in time.
    Timeout(String),
    /// File-system or process I/O failure.
    Io(String),
    /// State store persistence failure.
    State(String),
    /// Audit log write failure.
    Audit(String),
}

impl AppError {
    /// Whether the failure is scoped to the current cycle and should simply
    /// be retried on the next poll.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Auth(_) | Self::Protocol(_) | Self::Timeout(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Security(msg) => write!(f, "security: {msg}"),
            Self::Build(msg) => write!(f, "build: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::State(msg) => write!(f, "state: {msg}"),
            Self::Audit(msg) => write!(f, "audit: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
