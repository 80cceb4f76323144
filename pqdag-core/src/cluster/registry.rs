//! Node membership
//!
//! Resolves node roles from the master and workers records. Both records are
//! re-read on every call, so edits take effect immediately; an operation that
//! reads the registry twice may observe two different memberships.
//!
//! Membership ignores blank lines. Machine ids do not: machine id `n` is the
//! `n`-th raw line of the workers record, so a blank line in the middle
//! leaves an empty slot and later workers keep their positions.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::error::{PqdagError, Result};

/// Role a node plays in the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the query client
    Client,
    /// Runs the engine master
    Master,
    /// Runs an engine worker and stores fragments
    Worker,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Client => "client",
            NodeRole::Master => "master",
            NodeRole::Worker => "worker",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged node address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub address: String,
    pub role: NodeRole,
}

/// Reads cluster membership from the persisted records
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    master_file: PathBuf,
    workers_file: PathBuf,
    client_address: String,
}

impl NodeRegistry {
    /// Create a registry over the configured records
    pub fn new(cluster: &ClusterConfig) -> Self {
        Self::from_paths(
            cluster.master_file.clone(),
            cluster.workers_file.clone(),
            cluster.client_address.clone(),
        )
    }

    pub fn from_paths(
        master_file: impl Into<PathBuf>,
        workers_file: impl Into<PathBuf>,
        client_address: impl Into<String>,
    ) -> Self {
        Self {
            master_file: master_file.into(),
            workers_file: workers_file.into(),
            client_address: client_address.into(),
        }
    }

    /// Fixed client address
    pub fn client(&self) -> &str {
        &self.client_address
    }

    /// Master address, `None` when the record is missing or blank
    pub async fn master(&self) -> Result<Option<String>> {
        let lines = read_record(&self.master_file).await?;
        Ok(lines.into_iter().next())
    }

    /// Non-blank worker addresses in record order
    pub async fn workers(&self) -> Result<Vec<String>> {
        read_record(&self.workers_file).await
    }

    /// One slot per raw line of the workers record; slot `i` is machine id `i + 1`
    pub async fn worker_slots(&self) -> Result<Vec<Option<String>>> {
        let lines = read_raw_record(&self.workers_file).await?;
        Ok(lines
            .into_iter()
            .map(|line| (!line.is_empty()).then_some(line))
            .collect())
    }

    /// Address of the worker that hosts `machine_id` (1-based)
    pub async fn worker_for_machine(&self, machine_id: u32) -> Result<Option<String>> {
        let slots = self.worker_slots().await?;
        Ok(machine_id
            .checked_sub(1)
            .and_then(|index| slots.get(index as usize).cloned())
            .flatten())
    }

    /// Role of `address`; client wins over master, master over worker
    pub async fn resolve_role(&self, address: &str) -> Result<Option<NodeRole>> {
        if address == self.client_address {
            return Ok(Some(NodeRole::Client));
        }
        if self.master().await?.as_deref() == Some(address) {
            return Ok(Some(NodeRole::Master));
        }
        if self.workers().await?.iter().any(|w| w == address) {
            return Ok(Some(NodeRole::Worker));
        }
        Ok(None)
    }

    /// Every node, ordered client, master, workers; each address once
    pub async fn list_all_nodes(&self) -> Result<Vec<ClusterNode>> {
        let mut nodes = vec![ClusterNode {
            address: self.client_address.clone(),
            role: NodeRole::Client,
        }];
        if let Some(master) = self.master().await? {
            nodes.push(ClusterNode {
                address: master,
                role: NodeRole::Master,
            });
        }
        for worker in self.workers().await? {
            nodes.push(ClusterNode {
                address: worker,
                role: NodeRole::Worker,
            });
        }

        let mut seen = HashSet::new();
        nodes.retain(|node| {
            let first = seen.insert(node.address.clone());
            if !first {
                warn!(
                    "Address {} listed more than once, keeping its first role",
                    node.address
                );
            }
            first
        });

        debug!("Registry lists {} nodes", nodes.len());
        Ok(nodes)
    }

    /// Master followed by workers, without the client
    pub async fn engine_nodes(&self) -> Result<Vec<ClusterNode>> {
        let mut nodes = self.list_all_nodes().await?;
        nodes.retain(|node| node.role != NodeRole::Client);
        Ok(nodes)
    }
}

/// Trimmed non-blank lines of a record
async fn read_record(path: &Path) -> Result<Vec<String>> {
    let mut lines = read_raw_record(path).await?;
    lines.retain(|line| !line.is_empty());
    Ok(lines)
}

/// Every trimmed line of a record, blanks included; a missing record is empty
async fn read_raw_record(path: &Path) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content.lines().map(|line| line.trim().to_string()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Record {} not found, treating as empty", path.display());
            Ok(Vec::new())
        }
        Err(e) => Err(PqdagError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &std::path::Path, master: &str, workers: &str) -> NodeRegistry {
        std::fs::write(dir.join("master"), master).unwrap();
        std::fs::write(dir.join("workers"), workers).unwrap();
        NodeRegistry::from_paths(dir.join("master"), dir.join("workers"), "10.0.0.9")
    }

    #[tokio::test]
    async fn test_roles() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path(), "10.0.0.1\n", "10.0.0.2\n10.0.0.3\n");

        assert_eq!(reg.resolve_role("10.0.0.9").await.unwrap(), Some(NodeRole::Client));
        assert_eq!(reg.resolve_role("10.0.0.1").await.unwrap(), Some(NodeRole::Master));
        assert_eq!(reg.resolve_role("10.0.0.3").await.unwrap(), Some(NodeRole::Worker));
        assert_eq!(reg.resolve_role("10.0.0.4").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_machine_ids_are_one_based() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path(), "10.0.0.1", "10.0.0.2\n10.0.0.3\n");

        assert_eq!(reg.worker_for_machine(1).await.unwrap().as_deref(), Some("10.0.0.2"));
        assert_eq!(reg.worker_for_machine(2).await.unwrap().as_deref(), Some("10.0.0.3"));
        assert_eq!(reg.worker_for_machine(0).await.unwrap(), None);
        assert_eq!(reg.worker_for_machine(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_worker_line_keeps_positions() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path(), "10.0.0.1", "10.0.0.2\n\n  10.0.0.3 \n");

        assert_eq!(reg.workers().await.unwrap(), vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(
            reg.worker_slots().await.unwrap(),
            vec![Some("10.0.0.2".to_string()), None, Some("10.0.0.3".to_string())]
        );
        assert_eq!(reg.worker_for_machine(2).await.unwrap(), None);
        assert_eq!(reg.worker_for_machine(3).await.unwrap().as_deref(), Some("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_missing_records_leave_only_client() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = NodeRegistry::from_paths(tmp.path().join("m"), tmp.path().join("w"), "10.0.0.9");
        let nodes = reg.list_all_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].role, NodeRole::Client);
    }
}
