//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name under which mailbox keys are stored.
pub const KEYRING_SERVICE: &str = "agent-courier";

/// Connection settings for the collaboration endpoint.
///
/// The shared secret is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommsConfig {
    /// Base URL of the agent-comms API (no trailing slash required).
    pub base_url: String,
    /// Agent identity the courier reports as.
    pub agent_id: String,
    /// Keychain entry holding the reporter key.
    #[serde(default = "default_comms_credential")]
    pub credential: String,
    /// Environment variable consulted when the keychain has no entry.
    #[serde(default = "default_comms_env_key")]
    pub env_key: String,
    /// Platform tag attached to outgoing messages.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Per-request network timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Reporter key (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

fn default_comms_credential() -> String {
    "comms_key".into()
}

fn default_comms_env_key() -> String {
    "COURIER_COMMS_KEY".into()
}

fn default_platform() -> String {
    "orchestrator".into()
}

fn default_request_timeout() -> u64 {
    30
}

/// A watched mailbox and the rule that recognizes deliveries in it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MailboxConfig {
    /// Mailbox (agent) identifier.
    pub id: String,
    /// Keychain entry holding the mailbox key.
    pub credential: String,
    /// Environment variable consulted when the keychain has no entry.
    pub env_key: String,
    /// Senders whose messages count as deliveries; empty accepts anyone.
    #[serde(default)]
    pub delivery_senders: Vec<String>,
    /// Case-insensitive subject marker required for a delivery.
    #[serde(default)]
    pub subject_marker: Option<String>,
    /// Mailbox key (populated at runtime).
    #[serde(skip)]
    pub api_key: String,
}

impl MailboxConfig {
    /// Whether a message from `sender` with `subject` is a delivery for this mailbox.
    #[must_use]
    pub fn accepts(&self, sender: &str, subject: Option<&str>) -> bool {
        let sender_ok =
            self.delivery_senders.is_empty() || self.delivery_senders.iter().any(|s| s == sender);
        let subject_ok = self.subject_marker.as_ref().is_none_or(|marker| {
            subject.is_some_and(|s| s.to_uppercase().contains(&marker.to_uppercase()))
        });
        sender_ok && subject_ok
    }
}

/// Poll loop cadence and retry policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    /// Fixed delay between cycles.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Upper bound of the random jitter added to each delay.
    #[serde(default = "default_jitter")]
    pub jitter_seconds: u64,
    /// Handling failures tolerated before a message is dead-lettered.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            jitter_seconds: default_jitter(),
            max_failures: default_max_failures(),
        }
    }
}

fn default_interval() -> u64 {
    300
}

fn default_jitter() -> u64 {
    10
}

fn default_max_failures() -> u32 {
    5
}

/// Container rebuild settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BuildConfig {
    /// Whether writes trigger a rebuild at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Container CLI binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Compose file, relative to the workspace root.
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    /// Per-command timeout.
    #[serde(default = "default_build_timeout")]
    pub timeout_seconds: u64,
    /// Service URL probed after the rebuild.
    #[serde(default)]
    pub health_url: Option<String>,
    /// Health probe timeout.
    #[serde(default = "default_request_timeout")]
    pub health_timeout_seconds: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            docker_bin: default_docker_bin(),
            compose_file: default_compose_file(),
            timeout_seconds: default_build_timeout(),
            health_url: None,
            health_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_docker_bin() -> String {
    "docker".into()
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_build_timeout() -> u64 {
    120
}

/// Limits applied while extracting artifacts from a message body.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExtractConfig {
    /// Largest body accepted for extraction.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Most artifacts accepted from one message.
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            max_artifacts: default_max_artifacts(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_artifacts() -> usize {
    64
}

/// Optional prompt sent to a remote agent after deliveries were handled.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotifyConfig {
    /// Whether the notifier is active.
    #[serde(default)]
    pub enabled: bool,
    /// Agent that receives the prompt.
    #[serde(default)]
    pub target_agent: String,
    /// Prompt text.
    #[serde(default)]
    pub prompt: String,
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".courier/state.json")
}

fn default_audit_file() -> PathBuf {
    PathBuf::from(".courier/audit.jsonl")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root that untrusted artifact paths are joined against.
    pub workspace_root: PathBuf,
    /// Directories artifacts may be written under.
    pub allowed_roots: Vec<PathBuf>,
    /// De-duplication ledger location.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Audit trail location.
    #[serde(default = "default_audit_file")]
    pub audit_file: PathBuf,
    /// Collaboration endpoint settings.
    pub comms: CommsConfig,
    /// Watched mailboxes.
    pub mailboxes: Vec<MailboxConfig>,
    /// Poll cadence.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Rebuild settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Extraction limits.
    #[serde(default)]
    pub extract: ExtractConfig,
    /// Actuation channel.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration, replacing `workspace_root` before paths are
    /// resolved against it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str_with_workspace(raw: &str, workspace_root: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.workspace_root = workspace_root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Load the reporter key and every mailbox key from OS keychain with
    /// env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any key is missing from both sources.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.comms.api_key = load_credential(&self.comms.credential, &self.comms.env_key).await?;
        for mailbox in &mut self.mailboxes {
            mailbox.api_key = load_credential(&mailbox.credential, &mailbox.env_key).await?;
        }
        Ok(())
    }

    /// Look up a configured mailbox.
    #[must_use]
    pub fn mailbox(&self, id: &str) -> Option<&MailboxConfig> {
        self.mailboxes.iter().find(|m| m.id == id)
    }

    /// Absolute path of the compose file.
    #[must_use]
    pub fn compose_path(&self) -> PathBuf {
        self.workspace_root.join(&self.build.compose_file)
    }

    /// Per-request network timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.comms.request_timeout_seconds)
    }

    /// Per-command build timeout.
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.mailboxes.is_empty() {
            return Err(AppError::Config("mailboxes must not be empty".into()));
        }

        if self.allowed_roots.is_empty() {
            return Err(AppError::Config("allowed_roots must not be empty".into()));
        }

        if self.comms.base_url.trim().is_empty() {
            return Err(AppError::Config("comms.base_url must not be empty".into()));
        }

        if self.polling.interval_seconds == 0 {
            return Err(AppError::Config(
                "polling.interval_seconds must be greater than zero".into(),
            ));
        }

        if self.notify.enabled && self.notify.target_agent.is_empty() {
            return Err(AppError::Config(
                "notify.target_agent is required when notify is enabled".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        let root = self.workspace_root.clone();
        self.allowed_roots = self
            .allowed_roots
            .iter()
            .map(|entry| root.join(entry))
            .collect();
        self.state_file = root.join(&self.state_file);
        self.audit_file = root.join(&self.audit_file);

        for allowed in &self.allowed_roots {
            if !allowed.exists() {
                warn!(
                    root = %allowed.display(),
                    "allowlisted root does not exist yet; writes beneath it will create it"
                );
            }
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
