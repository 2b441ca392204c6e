#![forbid(unsafe_code)]

//! `agent-courier` delivery daemon binary.
//!
//! Bootstraps configuration and credentials, wires the delivery pipeline,
//! and runs the poll loop until SIGINT/SIGTERM (or one cycle with `--once`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_courier::audit::JsonlAuditWriter;
use agent_courier::build::{HttpHealthProbe, TokioCommandRunner};
use agent_courier::comms::{HttpMessageSource, MessageSource};
use agent_courier::config::GlobalConfig;
use agent_courier::notify::CommsNotifier;
use agent_courier::orchestrator::PollLoop;
use agent_courier::persistence::StateStore;
use agent_courier::pipeline::DeliveryPipeline;
use agent_courier::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-courier", about = "Mailbox-driven code delivery daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root from the configuration file.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Run a single poll cycle and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-courier bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let mut config = match &args.workspace {
        Some(ws) => GlobalConfig::from_toml_str_with_workspace(&config_text, ws)?,
        None => GlobalConfig::from_toml_str(&config_text)?,
    };

    // Missing credentials are fatal.
    config.load_credentials().await?;

    let config = Arc::new(config);
    info!(
        workspace = %config.workspace_root.display(),
        mailboxes = config.mailboxes.len(),
        "configuration loaded"
    );

    // ── Wire components ─────────────────────────────────
    let state = Arc::new(StateStore::open(config.state_file.clone())?);
    let audit = Arc::new(JsonlAuditWriter::new(config.audit_file.clone())?);
    let source: Arc<dyn MessageSource> = Arc::new(HttpMessageSource::from_config(&config)?);
    let runner = Arc::new(TokioCommandRunner::new(
        &config.build.docker_bin,
        config.build_timeout(),
    ));
    let probe = Arc::new(HttpHealthProbe::new(std::time::Duration::from_secs(
        config.build.health_timeout_seconds,
    ))?);

    let pipeline = Arc::new(DeliveryPipeline::from_config(
        &config,
        Arc::clone(&source),
        runner,
        probe,
        state,
        audit,
    )?);

    let mut poll_loop = PollLoop::new(Arc::clone(&config), Arc::clone(&source), pipeline);
    if config.notify.enabled {
        poll_loop = poll_loop.with_notifier(Arc::new(CommsNotifier::new(
            Arc::clone(&source),
            config.comms.agent_id.clone(),
            config.notify.target_agent.clone(),
            config.comms.platform.clone(),
        )));
    }
    let poll_loop = Arc::new(poll_loop);

    if args.once {
        let summary = poll_loop.run_once().await;
        info!(?summary, "single cycle finished");
        return Ok(());
    }

    // ── Run until shutdown signal ───────────────────────
    info!("agent-courier ready");
    poll_loop.run_until(shutdown_signal()).await?;
    info!("agent-courier shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
