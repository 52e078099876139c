//! simq.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DEFAULT_CHANNEL_TYPE;

/// Upper bound on operations per store transaction in bulk writes.
pub const DEFAULT_BATCH_LIMIT: usize = 500;

/// Upper bound on work units a single prepare may enqueue.
pub const DEFAULT_MAX_UNITS_PER_PREPARE: u64 = 100_000;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimqConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/simq"),
        }
    }
}

/// How the last work unit of a triple is sized.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalUnitPolicy {
    /// Every unit requests the full per-unit budget; the last one may
    /// over-provision.
    #[default]
    FullBudget,
    /// The last unit requests only what is still missing.
    ExactRemainder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Maximum operations per bulk-write transaction.
    pub batch_limit: usize,
    /// Messages per work unit when a prepare request omits `per_unit`.
    pub default_per_unit: u64,
    pub default_channel_type: String,
    /// Code types planned when a request omits `code_types`.
    pub code_types: Vec<String>,
    pub final_unit: FinalUnitPolicy,
    /// Subtract queued-but-unfetched messages from outstanding demand.
    pub net_queued_demand: bool,
    /// Prepare requests that would plan more units than this are rejected.
    pub max_units_per_prepare: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            default_per_unit: 1000,
            default_channel_type: DEFAULT_CHANNEL_TYPE.to_string(),
            code_types: vec!["fast-ssc".to_string(), "rc_scan".to_string()],
            final_unit: FinalUnitPolicy::FullBudget,
            net_queued_demand: true,
            max_units_per_prepare: DEFAULT_MAX_UNITS_PER_PREPARE,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.batch_limit",
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_per_unit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.default_per_unit",
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_units_per_prepare == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.max_units_per_prepare",
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_channel_type.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.default_channel_type",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl SimqConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimqConfig = toml::from_str(content)?;
        config.scheduler.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SimqConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimqConfig::default());
        assert_eq!(config.scheduler.batch_limit, 500);
        assert_eq!(config.scheduler.default_channel_type, "simple-bpsk");
        assert!(config.scheduler.net_queued_demand);
    }

    #[test]
    fn parse_partial_override() {
        let toml_str = r#"
[server]
port = 9000

[scheduler]
batch_limit = 100
final_unit = "exact_remainder"
code_types = ["fast-ssc"]
"#;
        let config = SimqConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.data_dir, PathBuf::from("/var/lib/simq"));
        assert_eq!(config.scheduler.batch_limit, 100);
        assert_eq!(config.scheduler.final_unit, FinalUnitPolicy::ExactRemainder);
        assert_eq!(config.scheduler.code_types, vec!["fast-ssc"]);
        assert_eq!(config.scheduler.default_per_unit, 1000);
    }

    #[test]
    fn zero_batch_limit_is_rejected() {
        let err = SimqConfig::from_toml_str("[scheduler]\nbatch_limit = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "scheduler.batch_limit", .. }
        ));
    }

    #[test]
    fn unit_cap_defaults_and_rejects_zero() {
        let config = SimqConfig::from_toml_str("[scheduler]\nmax_units_per_prepare = 250\n").unwrap();
        assert_eq!(config.scheduler.max_units_per_prepare, 250);
        assert_eq!(
            SchedulerSettings::default().max_units_per_prepare,
            DEFAULT_MAX_UNITS_PER_PREPARE
        );

        let err = SimqConfig::from_toml_str("[scheduler]\nmax_units_per_prepare = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "scheduler.max_units_per_prepare", .. }
        ));
    }

    #[test]
    fn rendered_config_parses_back() {
        let rendered = SimqConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("batch_limit = 500"));
        let parsed = SimqConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, SimqConfig::default());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SimqConfig::from_file(Path::new("/nonexistent/simq.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/simq.toml"));
    }
}
