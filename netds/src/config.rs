//! Process and datastore configuration, loaded from a TOML file.

use std::collections::HashSet;
use std::path::Path as FsPath;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SchemaId;

/// Default capacity of the target → reconciliation channel.
pub const DEFAULT_SYNC_BUFFER: usize = 1000;
/// Default timeout for southbound RPCs.
pub const DEFAULT_TARGET_TIMEOUT_SECS: u64 = 10;
/// Default timeout for schema server lookups.
pub const DEFAULT_SCHEMA_TIMEOUT_SECS: u64 = 10;
/// Default re-issue period for `once` subscriptions.
pub const DEFAULT_ONCE_PERIOD_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schema_server: SchemaServerConfig,
    #[serde(default)]
    pub datastores: Vec<DatastoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaServerConfig {
    pub address: String,
    /// Bound on connecting and on each lookup.
    #[serde(default = "default_schema_timeout")]
    pub timeout_secs: u64,
}

impl Default for SchemaServerConfig {
    fn default() -> Self {
        Self {
            address: "http://[::1]:55000".to_string(),
            timeout_secs: DEFAULT_SCHEMA_TIMEOUT_SECS,
        }
    }
}

impl SchemaServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration of one datastore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatastoreConfig {
    pub name: String,
    #[serde(default)]
    pub schema: SchemaId,
    #[serde(default)]
    pub sbi: SbiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Southbound interface kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SbiType {
    #[default]
    Noop,
    Gnmi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbiConfig {
    #[serde(rename = "type", default)]
    pub kind: SbiType,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_target_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Default for SbiConfig {
    fn default() -> Self {
        Self {
            kind: SbiType::Noop,
            address: String::new(),
            timeout_secs: DEFAULT_TARGET_TIMEOUT_SECS,
            credentials: None,
        }
    }
}

impl SbiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the bounded notification channel. A full channel blocks the producer.
    #[serde(default = "default_sync_buffer")]
    pub buffer_size: usize,
    #[serde(default)]
    pub gnmi: Vec<GnmiSync>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_SYNC_BUFFER,
            gnmi: Vec::new(),
        }
    }
}

/// Subscription mode for a sync entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// One-shot subscription re-issued every `period_secs`.
    Once,
    #[default]
    OnChange,
    Sample,
    TargetDefined,
}

/// One logical sub-tree kept in sync with the target. `name` tags every
/// notification the subscription produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnmiSync {
    pub name: String,
    pub paths: Vec<String>,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_once_period")]
    pub period_secs: u64,
    #[serde(default)]
    pub sample_interval_ms: u64,
}

impl GnmiSync {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn sample_interval(&self) -> Option<Duration> {
        (self.sample_interval_ms > 0).then(|| Duration::from_millis(self.sample_interval_ms))
    }
}

fn default_sync_buffer() -> usize {
    DEFAULT_SYNC_BUFFER
}

fn default_target_timeout() -> u64 {
    DEFAULT_TARGET_TIMEOUT_SECS
}

fn default_schema_timeout() -> u64 {
    DEFAULT_SCHEMA_TIMEOUT_SECS
}

fn default_once_period() -> u64 {
    DEFAULT_ONCE_PERIOD_SECS
}

fn default_encoding() -> String {
    "json_ietf".to_string()
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_server.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "schema_server timeout_secs must be > 0".into(),
            ));
        }
        let mut names = HashSet::new();
        for ds in &self.datastores {
            ds.validate()?;
            if !names.insert(ds.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate datastore name {:?}",
                    ds.name
                )));
            }
        }
        Ok(())
    }
}

impl DatastoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("datastore name is empty".into()));
        }
        if self.sbi.kind == SbiType::Gnmi && self.sbi.address.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "datastore {}: gnmi sbi requires an address",
                self.name
            )));
        }
        if self.sync.buffer_size == 0 {
            return Err(ConfigError::Invalid(format!(
                "datastore {}: sync buffer_size must be > 0",
                self.name
            )));
        }
        for sync in &self.sync.gnmi {
            if sync.paths.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "datastore {}: sync {} has no paths",
                    self.name, sync.name
                )));
            }
            if sync.mode == SyncMode::Once && sync.period_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "datastore {}: once sync {} needs a non-zero period",
                    self.name, sync.name
                )));
            }
        }
        Ok(())
    }
}
