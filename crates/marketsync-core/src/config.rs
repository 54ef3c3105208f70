//! Runtime configuration loaded from TOML.
//!
//! Every field has a default, so an absent file or a partial file is valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use marketsync_warehouse::{resolve_marketsync_home, WarehouseConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::bridge::DEFAULT_BRIDGE_URL;
use crate::governor::GovernorPolicy;
use crate::planner::SyncWindowPlanner;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub bridge_url: String,
    /// Sent as a bearer token when set.
    pub bridge_token: Option<String>,
    pub timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_interval_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            bridge_url: String::from(DEFAULT_BRIDGE_URL),
            bridge_token: None,
            timeout_ms: 10_000,
            connect_attempts: 10,
            connect_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSettings {
    pub second_margin_ms: u64,
    pub second_backoff_ms: u64,
    pub minute_margin_ms: u64,
    pub minute_backoff_ms: u64,
    pub fallback_per_second: u32,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            second_margin_ms: 500,
            second_backoff_ms: 1_000,
            minute_margin_ms: 1_000,
            minute_backoff_ms: 5_000,
            fallback_per_second: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Concurrent synchronization tasks.
    pub workers: usize,
    pub daily_lookback_days: u32,
    pub intraday_lookback_days: u32,
    pub page_size: u32,
    /// Request split/dividend-adjusted prices.
    pub adjusted: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            daily_lookback_days: 1_825,
            intraday_lookback_days: 7,
            page_size: 2_000,
            adjusted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Defaults to `$MARKETSYNC_HOME/warehouse.duckdb`.
    pub db_path: Option<PathBuf>,
    pub max_pool_size: usize,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            max_pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub provider: ProviderSettings,
    pub governor: GovernorSettings,
    pub sync: SyncSettings,
    pub warehouse: WarehouseSettings,
}

impl SyncConfig {
    /// Load `path`, or `$MARKETSYNC_HOME/config.toml` when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = resolve_marketsync_home().join(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.workers == 0 {
            return Err(ConfigError::Invalid(String::from("sync.workers must be at least 1")));
        }
        if self.sync.page_size == 0 {
            return Err(ConfigError::Invalid(String::from("sync.page_size must be at least 1")));
        }
        if self.provider.connect_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "provider.connect_attempts must be at least 1",
            )));
        }
        if self.warehouse.max_pool_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "warehouse.max_pool_size must be at least 1",
            )));
        }
        if !self.provider.bridge_url.starts_with("http://")
            && !self.provider.bridge_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "provider.bridge_url '{}' must be an http(s) URL",
                self.provider.bridge_url
            )));
        }
        Ok(())
    }

    pub fn governor_policy(&self) -> GovernorPolicy {
        GovernorPolicy {
            second_margin: Duration::from_millis(self.governor.second_margin_ms),
            second_backoff: Duration::from_millis(self.governor.second_backoff_ms),
            minute_margin: Duration::from_millis(self.governor.minute_margin_ms),
            minute_backoff: Duration::from_millis(self.governor.minute_backoff_ms),
            fallback_per_second: self.governor.fallback_per_second,
        }
    }

    pub fn planner(&self) -> SyncWindowPlanner {
        SyncWindowPlanner::new(
            self.sync.daily_lookback_days,
            self.sync.intraday_lookback_days,
        )
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.provider.connect_interval_ms)
    }

    pub fn warehouse_config(&self) -> WarehouseConfig {
        let defaults = WarehouseConfig::default();
        WarehouseConfig {
            db_path: self
                .warehouse
                .db_path
                .clone()
                .unwrap_or(defaults.db_path),
            max_pool_size: self.warehouse.max_pool_size,
            marketsync_home: defaults.marketsync_home,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: SyncConfig = toml::from_str("").expect("parse");
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.provider.bridge_url, DEFAULT_BRIDGE_URL);
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.governor_policy(), GovernorPolicy::default());
        assert_eq!(config.planner(), SyncWindowPlanner::default());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config: SyncConfig = toml::from_str(
            r#"
            [governor]
            minute_backoff_ms = 8000

            [sync]
            workers = 2
            adjusted = false

            [warehouse]
            db_path = "/tmp/marketsync-test.duckdb"
            "#,
        )
        .expect("parse");

        assert_eq!(config.governor.minute_backoff_ms, 8_000);
        assert_eq!(config.governor.second_margin_ms, 500);
        assert_eq!(config.sync.workers, 2);
        assert!(!config.sync.adjusted);
        assert_eq!(
            config.warehouse_config().db_path,
            PathBuf::from("/tmp/marketsync-test.duckdb")
        );
        assert_eq!(
            config.governor_policy().minute_backoff,
            Duration::from_secs(8)
        );
    }

    #[test]
    fn file_with_zero_workers_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[sync]\nworkers = 0\n").expect("write");

        let error = SyncConfig::from_file(&path).expect_err("must fail");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn unreadable_and_malformed_files_report_their_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            SyncConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[sync\nworkers = 2").expect("write");
        let error = SyncConfig::from_file(&broken).expect_err("must fail");
        assert!(error.to_string().contains("broken.toml"));
    }
}
