use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Connection details of one BusinessObjects environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    /// JSON fixture used to seed the in-memory backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoSyncConfig {
    pub source: Environment,
    pub target: Environment,
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rest,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub backend: Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default)]
    pub objects: ObjectToggles,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

/// Which artifact kinds a full or incremental run touches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectToggles {
    #[serde(default = "default_true")]
    pub folders: bool,
    #[serde(default = "default_true")]
    pub connections: bool,
    #[serde(default = "default_true")]
    pub universes: bool,
    #[serde(default = "default_true")]
    pub reports: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub schedule_type: ScheduleType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ScheduleType {
    #[serde(rename = "cron")]
    Cron { expression: String },
    #[serde(rename = "interval")]
    Interval {
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Environment {
    pub fn new(url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            auth_type: default_auth_type(),
            fixture: None,
        }
    }

    /// Copy that is safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "********".to_string();
        }
        copy
    }
}

impl Default for BoSyncConfig {
    fn default() -> Self {
        Self {
            source: Environment::new("http://bo-source:6405/biprws", "Administrator", ""),
            target: Environment::new("http://bo-target:6405/biprws", "Administrator", ""),
            environments: BTreeMap::new(),
            client: ClientSettings::default(),
            sync: SyncSettings::default(),
            http: HttpSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            accept_invalid_certs: false,
            backend: Backend::Rest,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            force_update: false,
            batch_size: default_batch_size(),
            objects: ObjectToggles::default(),
            schedule: ScheduleSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for ObjectToggles {
    fn default() -> Self {
        Self {
            folders: true,
            connections: true,
            universes: true,
            reports: true,
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_type: ScheduleType::Cron {
                expression: default_cron(),
            },
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Cron { expression } => f.write_str(expression),
            ScheduleType::Interval { interval } => write!(
                f,
                "every {}",
                humantime_serde::re::humantime::format_duration(*interval)
            ),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl BoSyncConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: BoSyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.source.url)?;
        url::Url::parse(&self.target.url)?;

        for (alias, environment) in &self.environments {
            if alias.eq_ignore_ascii_case("source") || alias.eq_ignore_ascii_case("target") {
                anyhow::bail!("Environment alias '{}' shadows a built-in environment", alias);
            }
            url::Url::parse(&environment.url)?;
        }

        if self.sync.batch_size <= 0 {
            anyhow::bail!("sync.batch_size must be positive, got {}", self.sync.batch_size);
        }
        if self.sync.retry.max_attempts == 0 {
            anyhow::bail!("sync.retry.max_attempts must be at least 1");
        }

        match &self.sync.schedule.schedule_type {
            ScheduleType::Cron { expression } => {
                let _ = cron::Schedule::from_str(expression)?;
            }
            ScheduleType::Interval { interval } => {
                if interval.is_zero() {
                    anyhow::bail!("sync.schedule.interval must be non-zero");
                }
            }
        }

        Ok(())
    }

    /// Copy with every password masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.source = self.source.redacted();
        copy.target = self.target.redacted();
        for environment in copy.environments.values_mut() {
            *environment = environment.redacted();
        }
        copy
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_auth_type() -> String { "secEnterprise".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_batch_size() -> i64 { 10 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_cron() -> String { "0 0 1 * * *".to_string() } // 01:00 every day
fn default_bind_address() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
