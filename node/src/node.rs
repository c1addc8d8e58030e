//! Node lifecycle

use fuse_core::NodeConfig;
use fuse_state::{
    open_sled_stores, SharedStateStore, SledBackend, SnapshotScheduler, StateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// A state store backed by sled under the configured data directory
pub struct FuseNode {
    config: NodeConfig,
    backend: Arc<SledBackend>,
    store: SharedStateStore,
}

impl FuseNode {
    /// Open the database. Existing state is not loaded until `initialize`.
    pub fn open(config: NodeConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let (backend, documents) = open_sled_stores(&config.data_dir)?;
        let store = StateStore::new(backend.clone(), documents, config.state.clone())?;
        info!("Opened {} at {}", config.name, config.data_dir.display());

        Ok(Self {
            config,
            backend,
            store: Arc::new(store),
        })
    }

    /// Load existing state from disk
    pub async fn initialize(&self) -> anyhow::Result<usize> {
        Ok(self.store.initialize().await?)
    }

    /// Run until Ctrl-C, snapshotting on the configured interval
    pub async fn start(&self) -> anyhow::Result<()> {
        let loaded = self.initialize().await?;
        info!("Node {} started with {} keys", self.config.name, loaded);

        let scheduler = SnapshotScheduler::spawn(self.store.clone());

        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping node..."),
            Err(e) => error!("Error waiting for shutdown signal: {}", e),
        }

        scheduler.shutdown().await;
        self.close().await?;

        info!("Node stopped");
        Ok(())
    }

    /// Take a final snapshot and flush the database
    pub async fn close(&self) -> anyhow::Result<()> {
        let snapshot = self.store.take_snapshot().await?;
        info!("Final snapshot {}", snapshot.id);
        self.flush()
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.backend.flush()?;
        Ok(())
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.store
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

/// Node builder for overriding file configuration from the command line
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.state.lock_timeout_ms = ms;
        self
    }

    pub fn snapshot_interval_ms(mut self, ms: u64) -> Self {
        self.config.state.snapshot_interval_ms = ms;
        self
    }

    /// The configuration the node would be opened with
    pub fn effective_config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn build(self) -> anyhow::Result<FuseNode> {
        FuseNode::open(self.config)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_survives_restart() {
        let tmp = TempDir::new().unwrap();

        {
            let node = NodeBuilder::new().data_dir(tmp.path()).build().unwrap();
            node.initialize().await.unwrap();
            node.store().set_state("agent", &json!({"status": "busy"})).await;
            node.close().await.unwrap();
        }

        let node = NodeBuilder::new().data_dir(tmp.path()).build().unwrap();
        assert_eq!(node.initialize().await.unwrap(), 1);
        assert_eq!(
            node.store().get_state::<Value>("agent").await,
            Some(json!({"status": "busy"}))
        );

        let latest = node.store().latest_snapshot().await.unwrap().unwrap();
        assert!(latest.value.contains_key("agent"));
    }

    #[test]
    fn test_builder_overrides() {
        let builder = NodeBuilder::new()
            .data_dir("/tmp/fuse")
            .lock_timeout_ms(5_000)
            .snapshot_interval_ms(10_000);

        let config = builder.effective_config();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fuse"));
        assert_eq!(config.state.lock_timeout_ms, 5_000);
        assert_eq!(config.state.snapshot_interval_ms, 10_000);
        assert_eq!(config.name, "fuse-node");
    }
}
