//! Side-by-side retrieval of server and cluster configuration documents.

use bo_sync_core::api::{DirectoryHandle, ListOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument};

use crate::environment::{EnvironmentResolver, SOURCE, TARGET};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Server,
    Cluster,
}

impl FromStr for ConfigType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(ConfigType::Server),
            "cluster" => Ok(ConfigType::Cluster),
            _ => Err(SyncError::UnsupportedConfigType(s.to_string())),
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigType::Server => f.write_str("server"),
            ConfigType::Cluster => f.write_str("cluster"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Differences {
    pub has_differences: bool,
}

/// Both configuration documents plus a coarse equality verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonDocument {
    #[serde(rename = "environment1")]
    pub env_a: String,
    #[serde(rename = "environment2")]
    pub env_b: String,
    pub config_type: String,
    #[serde(rename = "config1")]
    pub config_a: Value,
    #[serde(rename = "config2")]
    pub config_b: Value,
    #[serde(rename = "comparisonTimestamp", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub differences: Differences,
}

impl ComparisonDocument {
    fn new(env_a: &str, env_b: &str, config_type: &str, config_a: Value, config_b: Value) -> Self {
        let has_differences = config_a != config_b;
        Self {
            env_a: env_a.to_string(),
            env_b: env_b.to_string(),
            config_type: config_type.to_string(),
            config_a,
            config_b,
            timestamp: Utc::now(),
            differences: Differences { has_differences },
        }
    }

    pub fn has_differences(&self) -> bool {
        self.differences.has_differences
    }
}

#[derive(Clone)]
pub struct ConfigComparator {
    resolver: EnvironmentResolver,
}

impl ConfigComparator {
    pub fn new(resolver: EnvironmentResolver) -> Self {
        Self { resolver }
    }

    /// Server configuration of `config_type`, source against target.
    #[instrument(skip(self, options))]
    pub async fn compare_server_configs(
        &self,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        let (source, target) = (self.resolver.source()?, self.resolver.target()?);
        let config_a = source.get_server_config(config_type, options).await?;
        let config_b = target.get_server_config(config_type, options).await?;
        Ok(ComparisonDocument::new(SOURCE, TARGET, config_type, config_a, config_b))
    }

    /// Cluster configuration, source against target.
    #[instrument(skip(self, options))]
    pub async fn compare_cluster_configs(
        &self,
        cluster_id: Option<&str>,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        let (source, target) = (self.resolver.source()?, self.resolver.target()?);
        let config_a = source.get_cluster_config(cluster_id, options).await?;
        let config_b = target.get_cluster_config(cluster_id, options).await?;
        Ok(ComparisonDocument::new(SOURCE, TARGET, "cluster", config_a, config_b))
    }

    /// Compares any two named environments. Cluster comparisons read the
    /// cluster id from `options["clusterId"]`.
    #[instrument(skip(self, options))]
    pub async fn compare_configs(
        &self,
        env_a: &str,
        env_b: &str,
        config_type: &str,
        options: &ListOptions,
    ) -> Result<ComparisonDocument> {
        info!("Comparing configurations between environments");
        let kind: ConfigType = config_type.parse()?;
        let first = self.resolver.resolve(env_a)?;
        let second = self.resolver.resolve(env_b)?;

        let (config_a, config_b) = match kind {
            ConfigType::Server => (
                fetch_server(&first, config_type, options).await?,
                fetch_server(&second, config_type, options).await?,
            ),
            ConfigType::Cluster => {
                let cluster_id = options.get("clusterId").map(String::as_str);
                (
                    first.get_cluster_config(cluster_id, options).await?,
                    second.get_cluster_config(cluster_id, options).await?,
                )
            }
        };

        Ok(ComparisonDocument::new(env_a, env_b, config_type, config_a, config_b))
    }
}

async fn fetch_server(
    directory: &DirectoryHandle,
    config_type: &str,
    options: &ListOptions,
) -> Result<Value> {
    Ok(directory.get_server_config(config_type, options).await?)
}
