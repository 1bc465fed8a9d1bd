use anyhow::Result;
use bo_sync::SyncStatus;
use bo_sync_core::config::BoSyncConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

mod config;
mod daemon;
mod http;
mod scheduler;
mod telemetry;

use config::Overrides;
use daemon::SyncDaemon;

#[derive(Parser)]
#[command(name = "bo-sync-daemon")]
#[command(about = "Scheduled BusinessObjects synchronization daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides `logging.level`
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Start {
        /// HTTP bind address
        #[arg(long)]
        bind: Option<String>,

        /// HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Enable the timer regardless of `sync.schedule.enabled`
        #[arg(long)]
        schedule: bool,
    },
    /// Query a running daemon
    Status {
        /// Base URL of the daemon
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration with passwords masked
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut overrides = Overrides {
        log_level: cli.log_level.clone(),
        ..Default::default()
    };

    match cli.command {
        Commands::Start {
            bind,
            port,
            schedule,
        } => {
            overrides.bind_address = bind;
            overrides.port = port;
            overrides.schedule_enabled = schedule.then_some(true);

            let config = config::load(cli.config.as_ref(), &overrides).await?;
            let _log_guard = telemetry::initialize_logging(&config.logging)?;
            run_daemon(config).await
        }
        Commands::Status { url } => show_status(&url).await,
        Commands::Config { action } => match action {
            ConfigActions::Validate => validate_config(cli.config.as_ref(), &overrides).await,
            ConfigActions::Show => show_config(cli.config.as_ref(), &overrides).await,
            ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
        },
    }
}

async fn run_daemon(config: BoSyncConfig) -> Result<()> {
    info!("Starting sync daemon in foreground mode");
    let daemon = SyncDaemon::new(config)?;
    daemon.run().await
}

async fn show_status(url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let endpoint = format!("{}/sync/status", url.trim_end_matches('/'));

    match client.get(&endpoint).send().await {
        Ok(response) if response.status().is_success() => {
            let status: SyncStatus = response.json().await?;
            println!("Daemon Status: RUNNING");
            println!("Scheduled runs: {}", if status.enabled { "enabled" } else { "disabled" });
            println!("Schedule: {}", status.schedule);
            println!("In progress: {}", status.in_progress);
            match status.last_sync_time {
                Some(time) => println!("Last sync: {} ({} objects)", time, status.last_sync_count),
                None => println!("Last sync: never"),
            }
            Ok(())
        }
        Ok(response) => {
            println!("Daemon Status: UNHEALTHY (HTTP {})", response.status());
            Ok(())
        }
        Err(e) => {
            println!("Daemon Status: NOT RUNNING ({})", e);
            Ok(())
        }
    }
}

async fn validate_config(config_path: Option<&PathBuf>, overrides: &Overrides) -> Result<()> {
    let path = config::resolve_path(config_path);
    match config::load(Some(&path), overrides).await {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("Source: {}", config.source.url);
            println!("Target: {}", config.target.url);
            println!("Additional environments: {}", config.environments.len());
            println!("Schedule: {}", config.sync.schedule.schedule_type);
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

async fn show_config(config_path: Option<&PathBuf>, overrides: &Overrides) -> Result<()> {
    let path = config::resolve_path(config_path);
    let config = config::load(Some(&path), overrides).await?;
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = BoSyncConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
