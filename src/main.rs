use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_receptionist::config::{EMBEDDING_KEY_ENV, PASSWORD_ENV};
use mail_receptionist::embedding::create_provider;
use mail_receptionist::error::ConfigError;
use mail_receptionist::mail::Credential;
use mail_receptionist::pipeline::batch::load_auto_response;
use mail_receptionist::{BatchReport, Error, ReceptionistConfig, Settings, run_once};

const LOG_FILE: &str = "mail-receptionist.log";

#[derive(Parser, Debug)]
#[command(name = "mail-receptionist", version)]
#[command(about = "Sort incoming mail by similarity to example folders")]
struct Cli {
    /// Settings file (JSON)
    settings: PathBuf,

    /// Directory for the log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process unseen mail once
    Run,
    /// Process unseen mail periodically until Ctrl-C
    Watch {
        #[arg(long, default_value = "10")]
        interval_minutes: u64,
    },
    /// Validate the settings file and report every problem
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _log_guard = init_tracing(&cli.log_dir)?;
    info!("Mail Receptionist v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Check => check(&cli.settings),
        Command::Run => {
            let report = run_blocking(cli.settings).await?;
            println!("{report}");
            Ok(())
        }
        Command::Watch { interval_minutes } => watch(cli.settings, interval_minutes).await,
    }
}

/// Stderr plus a fresh log file in `log_dir`.
fn init_tracing(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let log_path = log_dir.join(LOG_FILE);
    match std::fs::remove_file(&log_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("removing old log {}", log_path.display()));
        }
    }

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

fn check(path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load(path)?;
    let mut violations = match ReceptionistConfig::from_settings(&settings) {
        Ok(config) => match load_auto_response(config.mail.auto_response_template.as_deref()) {
            Ok(_) => Vec::new(),
            Err(e) => e.violations().to_vec(),
        },
        Err(ConfigError::Invalid(list)) => list,
        Err(e) => return Err(e.into()),
    };
    if std::env::var(PASSWORD_ENV).map_or(true, |v| v.is_empty()) {
        violations.push(format!("Environment variable {PASSWORD_ENV} is not set."));
    }

    if violations.is_empty() {
        println!("{}: settings are valid", path.display());
        return Ok(());
    }
    for violation in &violations {
        println!("- {violation}");
    }
    anyhow::bail!("{} problem(s) in {}", violations.len(), path.display())
}

/// Load settings and run one batch on the blocking pool.
async fn run_blocking(path: PathBuf) -> anyhow::Result<BatchReport> {
    tokio::task::spawn_blocking(move || run_from_settings(&path))
        .await
        .context("batch task panicked")?
}

fn run_from_settings(path: &Path) -> anyhow::Result<BatchReport> {
    let mut settings = Settings::load(path)?;
    let config = ReceptionistConfig::from_settings(&settings)?;
    let api_key = std::env::var(EMBEDDING_KEY_ENV)
        .ok()
        .filter(|k| !k.is_empty())
        .map(SecretString::from);
    let embedder = create_provider(&config.ml, api_key)?;
    let credential = Credential::from_env(PASSWORD_ENV)?;
    Ok(run_once(&config, &mut settings, embedder.as_ref(), credential)?)
}

async fn watch(path: PathBuf, interval_minutes: u64) -> anyhow::Result<()> {
    let period = Duration::from_secs(interval_minutes.max(1) * 60);
    info!("Checking for new mail every {} min", period.as_secs() / 60);
    let mut tick = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match run_blocking(path.clone()).await {
                    Ok(report) => info!("{report}"),
                    Err(e) if is_configuration(&e) => return Err(e),
                    Err(e) => error!("Batch failed: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

/// Settings problems end the watch loop; everything else is retried next tick.
fn is_configuration(e: &anyhow::Error) -> bool {
    e.downcast_ref::<ConfigError>().is_some()
        || e.downcast_ref::<Error>().is_some_and(Error::is_configuration)
}
