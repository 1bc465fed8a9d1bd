use anyhow::{Context, Result};
use bo_sync::{MetricsCollector, SyncOptions, SyncOrchestrator};
use bo_sync_core::api::{ArtifactKind, ListOptions};
use bo_sync_core::config::BoSyncConfig;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod output;

use output::{render, CountReport, OutputFormat};

const DEFAULT_CONFIG_FILE: &str = "bo-sync.toml";

#[derive(Parser)]
#[command(name = "bo-sync")]
#[command(about = "Synchronize BusinessObjects content from a source to a target environment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "json")]
    output: OutputFormat,

    /// Log level, overrides `logging.level`
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Args)]
struct WriteArgs {
    /// Overwrite objects that already exist in the target
    #[arg(short, long)]
    force: bool,

    /// Concurrent report writes per batch
    #[arg(long)]
    batch_size: Option<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Folders, connections, universes, then reports
    All {
        #[arg(short, long)]
        force: bool,
    },
    /// Objects modified after a point in time
    Incremental {
        /// RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Restrict to these folder IDs
        #[arg(long = "folder")]
        folders: Vec<String>,

        #[arg(short, long)]
        force: bool,
    },
    /// Reports by ID, or by folder when an argument contains '/'
    Reports {
        ids: Vec<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Universes {
        ids: Vec<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    Connections {
        ids: Vec<String>,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// The folder tree below a path, or every root
    Folders {
        #[arg(long)]
        path: Option<String>,
        #[arg(short, long)]
        force: bool,
    },
    /// Force-sync what a universe depends on
    Dependencies {
        universe_id: String,
        /// Comma separated object types
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },
    /// Search the source environment
    Search {
        query: String,
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
    },
    /// Compare configuration documents
    Compare {
        #[command(subcommand)]
        target: CompareTarget,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum CompareTarget {
    /// Source against target server configuration
    Server {
        #[arg(long, default_value = "server")]
        config_type: String,
    },
    /// Source against target cluster configuration
    Cluster {
        #[arg(long)]
        cluster_id: Option<String>,
    },
    /// Any two named environments
    Configs {
        #[arg(long)]
        env1: String,
        #[arg(long)]
        env2: String,
        #[arg(long)]
        config_type: String,
        #[arg(long)]
        cluster_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    Validate,
    /// Print the configuration with passwords masked
    Show,
    Generate {
        /// Write to this file instead of stdout
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"));
        return run_config(action, cli.config.as_ref(), cli.output).await;
    }

    let config = load_config(cli.config.as_ref()).await?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let collector = Arc::new(MetricsCollector::new());
    let orchestrator = SyncOrchestrator::from_config(&config)
        .context("Failed to set up environments")?
        .with_metrics(collector.clone());

    let rendered = run(&cli.command, &orchestrator, &config, cli.output).await?;
    println!("{}", rendered);

    collector.log_summary();
    Ok(())
}

/// Logs go to stderr so stdout stays machine readable.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bo_sync={0},bo_sync_core={0},bo_sync_cli={0}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_config(path: Option<&PathBuf>) -> Result<BoSyncConfig> {
    let config = match path {
        Some(path) => BoSyncConfig::load(path)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
                BoSyncConfig::load(&default_path).await?
            } else {
                warn!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                BoSyncConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

fn options(config: &BoSyncConfig, write: &WriteArgs) -> SyncOptions {
    SyncOptions::default()
        .force_update(write.force)
        .batch_size(write.batch_size.unwrap_or(config.sync.batch_size))
}

fn ids(ids: &[String]) -> Option<Vec<String>> {
    (!ids.is_empty()).then(|| ids.to_vec())
}

fn kinds(types: &[String]) -> Option<Vec<ArtifactKind>> {
    (!types.is_empty()).then(|| types.iter().map(|t| ArtifactKind::parse(t)).collect())
}

async fn run(
    command: &Commands,
    orchestrator: &SyncOrchestrator,
    config: &BoSyncConfig,
    format: OutputFormat,
) -> Result<String> {
    match command {
        Commands::All { force } => {
            let count = orchestrator.sync_all(*force).await?;
            render(&CountReport::new("all", "objects", count), format)
        }
        Commands::Incremental {
            since,
            folders,
            force,
        } => {
            info!(since = ?since, folders = folders.len(), "Running incremental synchronization");
            let count = orchestrator
                .sync_incremental(*since, ids(folders), *force)
                .await?;
            render(&CountReport::new("incremental", "objects", count), format)
        }
        Commands::Reports { ids: list, write } => {
            let count = orchestrator
                .sync_reports(ids(list), options(config, write))
                .await?;
            render(&CountReport::new("reports", "reports", count), format)
        }
        Commands::Universes { ids: list, write } => {
            let count = orchestrator
                .sync_universes(ids(list), options(config, write))
                .await?;
            render(&CountReport::new("universes", "universes", count), format)
        }
        Commands::Connections { ids: list, write } => {
            let count = orchestrator
                .sync_connections(ids(list), options(config, write))
                .await?;
            render(&CountReport::new("connections", "connections", count), format)
        }
        Commands::Folders { path, force } => {
            let count = orchestrator
                .sync_folders(path.as_deref(), SyncOptions::default().force_update(*force))
                .await?;
            render(&CountReport::new("folders", "folders", count), format)
        }
        Commands::Dependencies { universe_id, types } => {
            let types = kinds(types);
            let count = orchestrator
                .sync_universe_dependencies(universe_id, types.as_deref())
                .await?;
            render(&CountReport::new("dependencies", "dependencies", count), format)
        }
        Commands::Search { query, types } => {
            let types = kinds(types);
            let results = orchestrator
                .search(query, types.as_deref(), None, &ListOptions::new())
                .await?;
            render(&results, format)
        }
        Commands::Compare { target } => {
            let document = match target {
                CompareTarget::Server { config_type } => {
                    orchestrator
                        .compare_server_configs(config_type, &ListOptions::new())
                        .await?
                }
                CompareTarget::Cluster { cluster_id } => {
                    orchestrator
                        .compare_cluster_configs(cluster_id.as_deref(), &ListOptions::new())
                        .await?
                }
                CompareTarget::Configs {
                    env1,
                    env2,
                    config_type,
                    cluster_id,
                } => {
                    let mut options = ListOptions::new();
                    if let Some(cluster_id) = cluster_id {
                        options.insert("clusterId".to_string(), cluster_id.clone());
                    }
                    orchestrator
                        .compare_configs(env1, env2, config_type, &options)
                        .await?
                }
            };
            render(&document, format)
        }
        Commands::Config { .. } => anyhow::bail!("config commands do not run against environments"),
    }
}

async fn run_config(
    action: &ConfigActions,
    path: Option<&PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        ConfigActions::Validate => {
            let config = load_config(path).await?;
            println!("✓ Configuration is valid");
            println!("Source: {}", config.source.url);
            println!("Target: {}", config.target.url);
            Ok(())
        }
        ConfigActions::Show => {
            let config = load_config(path).await?;
            println!("{}", render(&config.redacted(), format)?);
            Ok(())
        }
        ConfigActions::Generate { path } => {
            let config = BoSyncConfig::default();
            match path {
                Some(path) => {
                    config.save(path).await?;
                    println!("Configuration generated at {}", path.display());
                }
                None => println!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_sync::{EnvironmentResolver, OrchestratorSettings};
    use bo_sync_core::api::{MemoryDirectoryFactory, Report};
    use bo_sync_core::config::Environment;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_ids_and_flags() {
        let cli = Cli::parse_from([
            "bo-sync", "reports", "r1", "r2", "--force", "--batch-size", "4", "-o", "yaml",
        ]);
        assert_eq!(cli.output, OutputFormat::Yaml);
        match cli.command {
            Commands::Reports { ids, write } => {
                assert_eq!(ids, vec!["r1", "r2"]);
                assert!(write.force);
                assert_eq!(write.batch_size, Some(4));
            }
            _ => panic!("expected reports"),
        }

        let cli = Cli::parse_from(["bo-sync", "search", "sales", "--types", "Report,Universe"]);
        match cli.command {
            Commands::Search { types, .. } => {
                assert_eq!(
                    kinds(&types),
                    Some(vec![ArtifactKind::Report, ArtifactKind::Universe])
                );
            }
            _ => panic!("expected search"),
        }
    }

    #[tokio::test]
    async fn test_reports_command_against_memory_directories() {
        let factory = Arc::new(MemoryDirectoryFactory::new());
        factory
            .directory("source")
            .insert_report(Report::new("r1", "Revenue"));
        factory.directory("target");
        let orchestrator = SyncOrchestrator::new(
            EnvironmentResolver::new(
                Environment::new("http://dev/biprws", "a", ""),
                Environment::new("http://prod/biprws", "a", ""),
                Default::default(),
                factory.clone(),
            ),
            OrchestratorSettings::default(),
        );

        let cli = Cli::parse_from(["bo-sync", "reports"]);
        let out = run(&cli.command, &orchestrator, &BoSyncConfig::default(), cli.output)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(factory.directory("target").reports().len(), 1);
    }
}
