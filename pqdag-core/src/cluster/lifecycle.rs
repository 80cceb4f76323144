//! Cluster lifecycle management
//!
//! Start, stop and restart run the engine's bootstrap scripts on the control
//! host. Clearing processes fans a role-specific termination command out to
//! every registered node. Lifecycle operations are serialized: a restart's
//! quiescence and the post-clear quiescence both elapse while the operation
//! still holds the lock, so no start can slip in before ports are released.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::fanout::{FanOut, NodeCommand};
use super::registry::{ClusterNode, NodeRegistry, NodeRole};
use crate::config::ControlConfig;
use crate::error::{PqdagError, Result};
use crate::metrics::standard;
use crate::remote::{stage_identity_best_effort, CommandExecutor, CommandTarget};
use crate::status::ClusterStatus;

/// Exit codes of `pkill` meaning "killed" and "nothing to kill"
const TERMINATION_EXIT_CODES: &[i32] = &[0, 1];

/// Last known state of the engine processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Not started, stopped, or cleared
    Stopped,
    /// Start scripts completed successfully
    Running,
}

/// `pkill` pattern for `process` that cannot match the shell running it
pub(crate) fn process_pattern(process: &str) -> String {
    let mut chars = process.chars();
    match chars.next() {
        Some(first) => format!("[{}]{}", first, chars.as_str()),
        None => String::new(),
    }
}

/// Drives the engine through start, stop, restart and clear
pub struct ClusterManager {
    config: Arc<ControlConfig>,
    executor: Arc<dyn CommandExecutor>,
    registry: NodeRegistry,
    fanout: FanOut,
    state: RwLock<ClusterState>,
    op_lock: Mutex<()>,
}

impl ClusterManager {
    /// Create a manager; the engine is assumed stopped until started
    pub fn new(config: Arc<ControlConfig>, executor: Arc<dyn CommandExecutor>) -> Self {
        let registry = NodeRegistry::new(&config.cluster);
        let fanout = FanOut::new(executor.clone(), config.cluster.fanout_parallelism);
        Self {
            config,
            executor,
            registry,
            fanout,
            state: RwLock::new(ClusterState::Stopped),
            op_lock: Mutex::new(()),
        }
    }

    /// Last known state
    pub async fn state(&self) -> ClusterState {
        *self.state.read().await
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// StartCluster
    pub async fn start(&self) -> ClusterStatus {
        stage_identity_best_effort(&self.config.remote).await;
        let _op = self.op_lock.lock().await;
        match self.start_inner().await {
            Ok(output) => ClusterStatus::success("Cluster started successfully", output),
            Err(e) => {
                error!("Cluster start failed: {}", e);
                ClusterStatus::failure("start cluster", &e)
            }
        }
    }

    /// StopCluster
    pub async fn stop(&self) -> ClusterStatus {
        stage_identity_best_effort(&self.config.remote).await;
        let _op = self.op_lock.lock().await;
        match self.stop_inner().await {
            Ok(output) => ClusterStatus::success("Cluster stopped successfully", output),
            Err(e) => {
                error!("Cluster stop failed: {}", e);
                ClusterStatus::failure("stop cluster", &e)
            }
        }
    }

    /// RestartCluster
    pub async fn restart(&self) -> ClusterStatus {
        match self.try_restart().await {
            Ok(output) => ClusterStatus::success("Cluster restarted successfully", output),
            Err(e) => {
                error!("Cluster restart failed: {}", e);
                ClusterStatus::failure("restart cluster", &e)
            }
        }
    }

    /// Stop, wait out the quiescence interval, then start
    ///
    /// A failed stop is returned as is and start is never attempted.
    pub async fn try_restart(&self) -> Result<String> {
        stage_identity_best_effort(&self.config.remote).await;
        let _op = self.op_lock.lock().await;

        let stopped = self.stop_inner().await?;

        let quiescence = self.config.cluster.restart_quiescence;
        debug!("Waiting {:?} for ports to be released", quiescence);
        tokio::time::sleep(quiescence).await;

        let started = self.start_inner().await?;
        Ok(join_output(&stopped, &started))
    }

    /// ClearProcesses
    pub async fn clear_processes(&self) -> ClusterStatus {
        match self.try_clear_processes().await {
            Ok(status) => status,
            Err(e) => {
                error!("Clearing processes failed: {}", e);
                ClusterStatus::failure("clear processes", &e)
            }
        }
    }

    async fn try_clear_processes(&self) -> Result<ClusterStatus> {
        stage_identity_best_effort(&self.config.remote).await;
        let _op = self.op_lock.lock().await;

        let nodes = self.registry.list_all_nodes().await?;
        let mut plan = Vec::with_capacity(nodes.len());
        for node in nodes {
            // Records are re-read; fall back to the listed role if the node left
            let role = self
                .registry
                .resolve_role(&node.address)
                .await?
                .unwrap_or(node.role);
            plan.push(NodeCommand {
                command: self.termination_command(role),
                node: ClusterNode {
                    address: node.address,
                    role,
                },
            });
        }

        info!("Clearing engine processes on {} nodes", plan.len());
        let report = self.fanout.run(plan, TERMINATION_EXIT_CODES).await;
        standard::NODES_CLEARED.inc_by(report.succeeded() as u64);
        self.set_state(ClusterState::Stopped).await;

        let message = format!(
            "Cleared processes on {}/{} nodes",
            report.succeeded(),
            report.total()
        );
        info!("{}", message);

        let quiescence = self.config.cluster.clear_quiescence;
        debug!("Waiting {:?} for ports to be released", quiescence);
        tokio::time::sleep(quiescence).await;

        let output = report.render("Cleared");
        let mut status = match report.check() {
            Ok(()) => ClusterStatus::success(message, output),
            Err(e) => {
                warn!("{}", e);
                ClusterStatus::error(message, output)
            }
        };
        status.nodes = report.outcomes;
        Ok(status)
    }

    fn termination_command(&self, role: NodeRole) -> String {
        let cluster = &self.config.cluster;
        let process = match role {
            NodeRole::Client => &cluster.client_process,
            NodeRole::Master => &cluster.master_process,
            NodeRole::Worker => &cluster.worker_process,
        };
        format!("pkill -9 -f '{}'", process_pattern(process))
    }

    async fn start_inner(&self) -> Result<String> {
        let output = self.run_script("start-all").await?;
        self.set_state(ClusterState::Running).await;
        Ok(output)
    }

    async fn stop_inner(&self) -> Result<String> {
        let output = self.run_script("stop-all").await?;
        self.set_state(ClusterState::Stopped).await;
        Ok(output)
    }

    /// Run a bootstrap script on the control host; only exit 0 succeeds
    async fn run_script(&self, script: &'static str) -> Result<String> {
        let cluster = &self.config.cluster;
        let command = format!(
            "cd {dir} && python3 {dir}/{script} {install}",
            dir = cluster.scripts_dir,
            install = cluster.install_dir,
        );
        info!("Running {} on {}", script, cluster.control_host);

        let target = CommandTarget::host(cluster.control_host.clone());
        let output = self.executor.execute(&target, &command).await?;
        if !output.success() {
            return Err(PqdagError::RemoteOpFailed {
                operation: script,
                exit_code: output.exit_code,
                output: output.output,
            });
        }
        Ok(output.output)
    }

    async fn set_state(&self, next: ClusterState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Cluster state {:?} -> {:?}", *state, next);
        }
        *state = next;
        standard::CLUSTER_RUNNING.set(i64::from(next == ClusterState::Running));
    }
}

fn join_output(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (true, _) => second.to_string(),
        (_, true) => first.to_string(),
        _ if first.ends_with('\n') => format!("{first}{second}"),
        _ => format!("{first}\n{second}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_does_not_match_itself() {
        assert_eq!(process_pattern("worker.jar"), "[w]orker.jar");
        assert_eq!(process_pattern(""), "");
    }

    #[test]
    fn test_join_output() {
        assert_eq!(join_output("stopped\n", "started\n"), "stopped\nstarted\n");
        assert_eq!(join_output("stopped", "started"), "stopped\nstarted");
        assert_eq!(join_output("", "started"), "started");
    }
}
