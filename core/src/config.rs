//! Configuration types for Fuse state

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FuseError;
use crate::traits::FuseResult;

/// What to do with a backend entry that fails to parse during the startup scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Abort initialization
    #[default]
    FailFast,
    /// Log the entry and continue
    SkipInvalid,
}

/// Where advisory locks live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    /// Process-local lock table; no exclusion across instances
    #[default]
    Local,
    /// Locks stored in the shared backend via compare-and-swap
    Backend,
}

/// State store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    /// Lock lifetime in milliseconds
    pub lock_timeout_ms: u64,

    /// Periodic snapshot interval in milliseconds
    pub snapshot_interval_ms: u64,

    /// Entries fetched per page during the startup scan
    pub scan_batch_size: usize,

    pub load_policy: LoadPolicy,

    pub lock_scope: LockScope,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            snapshot_interval_ms: 60_000,
            scan_batch_size: 500,
            load_policy: LoadPolicy::FailFast,
            lock_scope: LockScope::Local,
        }
    }
}

impl StateStoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn validate(&self) -> FuseResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(FuseError::Config("lock_timeout_ms must be positive".into()));
        }
        if self.snapshot_interval_ms == 0 {
            return Err(FuseError::Config(
                "snapshot_interval_ms must be positive".into(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(FuseError::Config("scan_batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Operator node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Directory holding the embedded database
    pub data_dir: PathBuf,

    /// Logging level, overridden by `RUST_LOG`
    pub log_level: String,

    pub state: StateStoreConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "fuse-node".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            state: StateStoreConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> FuseResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FuseError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> FuseResult<Self> {
        let config: NodeConfig = serde_json::from_str(content)
            .map_err(|e| FuseError::Config(format!("invalid config: {}", e)))?;
        config.state.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StateStoreConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.snapshot_interval(), Duration::from_secs(60));
        assert_eq!(config.load_policy, LoadPolicy::FailFast);
        assert_eq!(config.lock_scope, LockScope::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = NodeConfig::from_json(
            r#"{"name": "n1", "state": {"lock_timeout_ms": 500, "load_policy": "skip_invalid"}}"#,
        )
        .unwrap();
        assert_eq!(config.name, "n1");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.state.lock_timeout_ms, 500);
        assert_eq!(config.state.snapshot_interval_ms, 60_000);
        assert_eq!(config.state.load_policy, LoadPolicy::SkipInvalid);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = NodeConfig::from_json(r#"{"state": {"snapshot_interval_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, FuseError::Config(_)));
    }
}
