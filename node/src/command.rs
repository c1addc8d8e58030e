//! One-shot commands against an opened node

use anyhow::Context;
use clap::Subcommand;
use serde_json::Value;

use crate::node::FuseNode;

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum StoreCommand {
    /// Print a value
    Get { key: String },

    /// Write a JSON value (strings must be quoted)
    Set { key: String, value: String },

    /// Delete a value
    Delete { key: String },

    /// Delete every value
    Clear,

    /// Take a snapshot now
    Snapshot,

    /// List snapshot ids
    Snapshots,

    /// Print a snapshot
    ShowSnapshot { id: String },

    /// Replace current state with a snapshot
    Restore { id: String },
}

/// Parse a command-line value as JSON
pub fn parse_value(key: &str, raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw)
        .with_context(|| format!("value for {} is not valid JSON: {}", key, raw))
}

/// Run `command` and return what to print
pub async fn execute(node: &FuseNode, command: StoreCommand) -> anyhow::Result<String> {
    let store = node.store();

    let output = match command {
        StoreCommand::Get { key } => match store.try_get_state::<Value>(&key).await? {
            Some(value) => serde_json::to_string_pretty(&value)?,
            None => "(absent)".to_string(),
        },

        StoreCommand::Set { key, value } => {
            let parsed = parse_value(&key, &value)?;
            let version = store.try_set_state(&key, &parsed).await?;
            format!("{} = {} ({})", key, parsed, version)
        }

        StoreCommand::Delete { key } => {
            let existed = store.try_delete_state(&key).await?;
            let outcome = if existed { "deleted" } else { "absent" };
            outcome.to_string()
        }

        StoreCommand::Clear => {
            let removed = store.try_clear_state().await?;
            format!("Cleared {} keys", removed)
        }

        StoreCommand::Snapshot => {
            let snapshot = store.take_snapshot().await?;
            format!("{} ({} keys)", snapshot.id, snapshot.len())
        }

        StoreCommand::Snapshots => store.list_snapshots().await?.join("\n"),

        StoreCommand::ShowSnapshot { id } => match store.try_get_snapshot(&id).await? {
            Some(snapshot) => serde_json::to_string_pretty(&snapshot)?,
            None => anyhow::bail!("snapshot not found: {}", id),
        },

        StoreCommand::Restore { id } => {
            let restored = store.restore_snapshot(&id).await?;
            format!("Restored {} keys from {}", restored, id)
        }
    };

    node.flush()?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBuilder;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_node(tmp: &TempDir) -> FuseNode {
        let node = NodeBuilder::new().data_dir(tmp.path()).build().unwrap();
        node.initialize().await.unwrap();
        node
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("k", r#"{"n": 1}"#).unwrap(), json!({"n": 1}));
        assert_eq!(parse_value("k", r#""text""#).unwrap(), json!("text"));
        assert_eq!(parse_value("k", "42").unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_json() {
        let tmp = TempDir::new().unwrap();
        let node = open_node(&tmp).await;

        let command = StoreCommand::Set {
            key: "k".to_string(),
            value: "{not json".to_string(),
        };
        let err = execute(&node, command).await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
        assert_eq!(node.store().get_state::<Value>("k").await, None);
    }

    #[tokio::test]
    async fn test_set_get_and_snapshot_commands() {
        let tmp = TempDir::new().unwrap();
        let node = open_node(&tmp).await;

        let out = execute(
            &node,
            StoreCommand::Set {
                key: "k".to_string(),
                value: r#"{"n": 1}"#.to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, r#"k = {"n":1} (v1)"#);

        let out = execute(&node, StoreCommand::Get { key: "k".to_string() })
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({"n": 1}));

        let out = execute(&node, StoreCommand::Snapshot).await.unwrap();
        assert!(out.starts_with("snapshot_"));

        let err = execute(
            &node,
            StoreCommand::ShowSnapshot {
                id: "snapshot_0".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("snapshot not found"));
    }
}
