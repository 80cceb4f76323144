//! Control plane wiring
//!
//! Builds every component from one configuration and one executor. Must be
//! created inside a tokio runtime because the background pool spawns its
//! workers immediately.

use std::sync::Arc;

use tracing::info;

use crate::allocation::AllocationPipeline;
use crate::cluster::{ClusterManager, DatasetSwitch, QueryService};
use crate::config::ControlConfig;
use crate::remote::{CommandExecutor, ProcessExecutor};
use crate::runtime::{BackgroundPool, ShutdownSignal};

/// All operation entry points behind one handle
pub struct ControlPlane {
    config: Arc<ControlConfig>,
    pipeline: AllocationPipeline,
    cluster: Arc<ClusterManager>,
    datasets: DatasetSwitch,
    queries: QueryService,
    background: Arc<BackgroundPool>,
}

impl ControlPlane {
    pub fn new(config: ControlConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        let config = Arc::new(config);
        let background = Arc::new(BackgroundPool::start(
            &config.background,
            ShutdownSignal::new(),
        ));
        let cluster = Arc::new(ClusterManager::new(config.clone(), executor.clone()));

        Self {
            pipeline: AllocationPipeline::new(config.clone(), executor.clone()),
            datasets: DatasetSwitch::new(config.clone(), executor.clone()),
            queries: QueryService::new(
                config.clone(),
                executor,
                cluster.clone(),
                background.clone(),
            ),
            cluster,
            background,
            config,
        }
    }

    /// Control plane running real processes
    pub fn with_process_executor(config: ControlConfig) -> Self {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new(&config));
        Self::new(config, executor)
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &AllocationPipeline {
        &self.pipeline
    }

    pub fn cluster(&self) -> &ClusterManager {
        &self.cluster
    }

    pub fn datasets(&self) -> &DatasetSwitch {
        &self.datasets
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    /// Stop the background pool, letting a running job finish
    pub async fn shutdown(&self) {
        info!("Shutting down control plane");
        self.background.shutdown().await;
    }
}
