//! Runtime configuration.
//!
//! Loaded from JSON; every field has a default so an empty object is valid.

use crate::election::{ElectionConfig, ElectionError};
use crate::logging::{default_log_level, parse_level, LoggingError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error("events.{0} must be positive")]
    ZeroCapacity(&'static str),
}

/// Buffer sizes of the broadcast channels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventConfig {
    /// Status change events buffered per kernel subscriber.
    pub kernel_capacity: usize,
    /// Push messages buffered per transport subscriber.
    pub push_capacity: usize,
    /// Storage notifications buffered per in-memory storage subscriber.
    pub storage_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            kernel_capacity: DEFAULT_EVENT_CAPACITY,
            push_capacity: DEFAULT_EVENT_CAPACITY,
            storage_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub log_level: String,
    /// File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub election: ElectionConfig,
    pub events: EventConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            election: ElectionConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_level(&self.log_level)?;
        self.election.validate()?;
        for (field, capacity) in [
            ("kernel_capacity", self.events.kernel_capacity),
            ("push_capacity", self.events.push_capacity),
            ("storage_capacity", self.events.storage_capacity),
        ] {
            if capacity == 0 {
                return Err(ConfigError::ZeroCapacity(field));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RuntimeConfig};
    use crate::election::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_STALENESS_THRESHOLD_MS};

    #[test]
    fn empty_object_yields_defaults() {
        let config = RuntimeConfig::from_json_str("{}").expect("defaults");
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(
            config.election.heartbeat_interval_ms,
            DEFAULT_HEARTBEAT_INTERVAL_MS
        );
        assert_eq!(
            config.election.staleness_threshold_ms,
            DEFAULT_STALENESS_THRESHOLD_MS
        );
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = RuntimeConfig::from_json_str(
            r#"{"log_level":"warning","election":{"scope":"calls","staleness_threshold_ms":5000}}"#,
        )
        .expect("valid");
        assert_eq!(config.election.scope, "calls");
        assert_eq!(config.election.heartbeat_interval_ms, 1_000);
        assert_eq!(config.election.staleness_threshold_ms, 5_000);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"mystery":true}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"election":{"heartbeat_interval_ms":4000}}"#),
            Err(ConfigError::Election(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"events":{"push_capacity":0}}"#),
            Err(ConfigError::ZeroCapacity("push_capacity"))
        ));
        assert!(matches!(
            RuntimeConfig::from_json_str(r#"{"log_level":"chatty"}"#),
            Err(ConfigError::Logging(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RuntimeConfig::load(dir.path().join("absent.json")).expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
