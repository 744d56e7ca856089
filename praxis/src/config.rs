//! Orchestrator configuration.
//!
//! Every section derives serde with `#[serde(default)]`, so a config file
//! only names the values it overrides. Durations are written as seconds
//! (fractions allowed):
//!
//! ```json
//! {
//!   "lock": { "stale_timeout": 300, "heartbeat_interval": 10 },
//!   "dag": { "delegation_timeout": 120, "max_concurrency": 4 },
//!   "watcher": { "poll_interval": 2.5 }
//! }
//! ```

use crate::cache::CacheConfig;
use crate::context::ContextConfig;
use crate::dag::DagConfig;
use crate::lock::LockConfig;
use crate::watcher::WatcherConfig;
use crate::workflow::WorkflowConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub lock: LockConfig,
    pub dag: DagConfig,
    pub watcher: WatcherConfig,
    pub context: ContextConfig,
    pub cache: CacheConfig,
    pub workflow: WorkflowConfig,
}

impl OrchestratorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lock.validate()?;
        self.dag.validate()?;

        if self.watcher.poll_interval.is_zero() {
            return Err(ConfigError::invalid("watcher.poll_interval", "must be positive"));
        }
        if self.context.retention.is_zero() {
            return Err(ConfigError::invalid("context.retention", "must be positive"));
        }
        if self.context.max_summary_chars == 0 {
            return Err(ConfigError::invalid("context.max_summary_chars", "must be nonzero"));
        }
        if self.cache.write_buffer_capacity == 0 {
            return Err(ConfigError::invalid("cache.write_buffer_capacity", "must be nonzero"));
        }
        if self.cache.warm_capacity == 0 {
            return Err(ConfigError::invalid("cache.warm_capacity", "must be nonzero"));
        }
        if self.cache.warm_ttl.is_zero() || self.cache.flush_interval.is_zero() {
            return Err(ConfigError::invalid(
                "cache",
                "warm_ttl and flush_interval must be positive",
            ));
        }
        if self.workflow.max_transitions == 0 {
            return Err(ConfigError::invalid("workflow.max_transitions", "must be nonzero"));
        }
        if self.workflow.retention.is_zero() || self.workflow.suspension_ttl.is_zero() {
            return Err(ConfigError::invalid(
                "workflow",
                "retention and suspension_ttl must be positive",
            ));
        }
        Ok(())
    }
}

/// (De)serializes a `Duration` as fractional seconds.
pub(crate) mod serde_secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lock.stale_timeout, Duration::from_secs(300));
        assert_eq!(config.lock.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.watcher.poll_interval, Duration::from_secs(10));
        assert_eq!(config.workflow.max_transitions, 100);
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let config = OrchestratorConfig::from_json_str(
            r#"{"dag": {"delegation_timeout": 1.5, "max_concurrency": 2}, "watcher": {"poll_interval": 0.25}}"#,
        )
        .unwrap();

        assert_eq!(config.dag.delegation_timeout, Duration::from_millis(1500));
        assert_eq!(config.dag.max_concurrency, Some(2));
        assert_eq!(config.watcher.poll_interval, Duration::from_millis(250));
        assert_eq!(config.lock, LockConfig::default());
    }

    #[test]
    fn test_heartbeat_must_be_well_under_stale_timeout() {
        let err = OrchestratorConfig::from_json_str(
            r#"{"lock": {"stale_timeout": 40, "heartbeat_interval": 10}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "lock.heartbeat_interval", .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for json in [
            r#"{"dag": {"critical_confidence": 1.5}}"#,
            r#"{"cache": {"warm_capacity": 0}}"#,
            r#"{"watcher": {"poll_interval": 0}}"#,
            r#"{"workflow": {"max_transitions": 0}}"#,
        ] {
            assert!(
                matches!(OrchestratorConfig::from_json_str(json), Err(ConfigError::Invalid { .. })),
                "{} should be rejected",
                json
            );
        }
        assert!(matches!(
            OrchestratorConfig::from_json_str(r#"{"watcher": {"poll_interval": -1}}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("praxis.json");
        std::fs::write(&path, r#"{"context": {"max_summary_chars": 120}}"#).unwrap();

        let config = OrchestratorConfig::from_file(&path).unwrap();
        assert_eq!(config.context.max_summary_chars, 120);
    }
}
