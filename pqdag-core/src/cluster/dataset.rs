//! Engine dataset selection
//!
//! The engine reads `DB_DEFAULT` from `conf/config.properties` on every
//! node. Switching rewrites that line on the master and each worker.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::fanout::{FanOut, NodeCommand};
use super::registry::NodeRegistry;
use crate::config::ControlConfig;
use crate::error::Result;
use crate::remote::{
    safe_token, stage_identity_best_effort, strip_transport_noise, CommandExecutor, CommandTarget,
};
use crate::status::ClusterStatus;

const DATASET_KEY: &str = "DB_DEFAULT";

/// Reads and switches the engine's default dataset
pub struct DatasetSwitch {
    config: Arc<ControlConfig>,
    executor: Arc<dyn CommandExecutor>,
    registry: NodeRegistry,
    fanout: FanOut,
}

impl DatasetSwitch {
    pub fn new(config: Arc<ControlConfig>, executor: Arc<dyn CommandExecutor>) -> Self {
        let registry = NodeRegistry::new(&config.cluster);
        let fanout = FanOut::new(executor.clone(), config.cluster.fanout_parallelism);
        Self {
            config,
            executor,
            registry,
            fanout,
        }
    }

    fn properties_file(&self) -> String {
        format!("{}/conf/config.properties", self.config.cluster.install_dir)
    }

    /// SetDataset: rewrite the default dataset on master and workers
    pub async fn set_dataset(&self, dataset: &str) -> ClusterStatus {
        match self.try_set_dataset(dataset).await {
            Ok(status) => status,
            Err(e) => {
                error!("Setting dataset {} failed: {}", dataset, e);
                ClusterStatus::failure("set dataset", &e)
            }
        }
    }

    async fn try_set_dataset(&self, dataset: &str) -> Result<ClusterStatus> {
        let dataset = safe_token("dataset", dataset)?;
        stage_identity_best_effort(&self.config.remote).await;

        let command = format!(
            "sed -i 's/^{key}=.*/{key}={dataset}/' {file}",
            key = DATASET_KEY,
            file = self.properties_file(),
        );
        let plan: Vec<NodeCommand> = self
            .registry
            .engine_nodes()
            .await?
            .into_iter()
            .map(|node| NodeCommand {
                node,
                command: command.clone(),
            })
            .collect();
        if plan.is_empty() {
            return Ok(ClusterStatus::error("No engine nodes are registered", ""));
        }

        info!("Switching {} nodes to dataset {}", plan.len(), dataset);
        let report = self.fanout.run(plan, &[0]).await;
        let output = report.render("Updated");

        let mut status = match report.check() {
            Ok(()) => ClusterStatus::success(format!("Dataset changed to: {dataset}"), output),
            Err(e) => {
                warn!("Dataset switch incomplete: {}", e);
                ClusterStatus::error(format!("Failed to update dataset on some nodes: {e}"), output)
            }
        };
        status.nodes = report.outcomes;
        Ok(status)
    }

    /// CurrentDataset: the default dataset on the control host, if set
    pub async fn current_dataset(&self) -> Option<String> {
        match self.read_current().await {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("Reading current dataset failed: {}", e);
                None
            }
        }
    }

    async fn read_current(&self) -> Result<Option<String>> {
        let command = format!(
            "grep '^{key}=' {file} | cut -d'=' -f2",
            key = DATASET_KEY,
            file = self.properties_file(),
        );
        let target = CommandTarget::host(self.config.cluster.control_host.clone());
        let output = self.executor.execute(&target, &command).await?;
        if !output.success() {
            debug!("{} lookup exited with {}", DATASET_KEY, output.exit_code);
            return Ok(None);
        }
        Ok(strip_transport_noise(&output.output)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from))
    }
}
