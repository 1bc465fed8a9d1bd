//! Configuration loading for the daemon process.

use anyhow::{Context, Result};
use bo_sync_core::config::BoSyncConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "bo-sync.toml";

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub schedule_enabled: Option<bool>,
}

impl Overrides {
    pub fn apply(&self, config: &mut BoSyncConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(bind_address) = &self.bind_address {
            config.http.bind_address = bind_address.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(enabled) = self.schedule_enabled {
            config.sync.schedule.enabled = enabled;
        }
    }
}

pub fn resolve_path(path: Option<&PathBuf>) -> PathBuf {
    path.cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads and validates the file at `path`.
///
/// A missing file is only tolerated when no path was given explicitly, in
/// which case the defaults are used.
pub async fn load(path: Option<&PathBuf>, overrides: &Overrides) -> Result<BoSyncConfig> {
    let resolved = resolve_path(path);

    let mut config = if path.is_none() && !exists(&resolved).await {
        warn!(
            "No configuration file at {}, using defaults",
            resolved.display()
        );
        BoSyncConfig::default()
    } else {
        info!("Loading configuration from {}", resolved.display());
        BoSyncConfig::load(&resolved)
            .await
            .with_context(|| format!("Failed to load {}", resolved.display()))?
    };

    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
