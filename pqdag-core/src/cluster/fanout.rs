//! Bounded per-node fan-out
//!
//! Runs one command per node on a fixed number of concurrent slots. Results
//! land in a slot keyed by the node's position in the plan, so the report is
//! in registry order whatever order the nodes finish in. A failing node never
//! stops the others.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::registry::ClusterNode;
use crate::error::{PqdagError, Result};
use crate::remote::{CommandExecutor, CommandTarget};
use crate::status::NodeOutcome;

/// One planned command
#[derive(Debug, Clone)]
pub struct NodeCommand {
    pub node: ClusterNode,
    pub command: String,
}

/// Per-node results in plan order
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub outcomes: Vec<NodeOutcome>,
}

impl FanOutReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// `PartialFanOut` unless every node succeeded
    pub fn check(&self) -> Result<()> {
        if self.all_succeeded() {
            Ok(())
        } else {
            Err(PqdagError::PartialFanOut {
                succeeded: self.succeeded(),
                total: self.total(),
            })
        }
    }

    /// Human-readable summary, one block per node address
    pub fn render(&self, verb: &str) -> String {
        let mut text = String::new();
        for outcome in &self.outcomes {
            match (outcome.success, outcome.exit_code) {
                (true, _) => text.push_str(&format!("{} {}\n", verb, outcome.address)),
                (false, Some(code)) => text.push_str(&format!(
                    "Warning: {} returned exit code {}\n",
                    outcome.address, code
                )),
                (false, None) => {
                    text.push_str(&format!("Failed: {}\n", outcome.address));
                }
            }
            for line in outcome.output.lines().filter(|l| !l.trim().is_empty()) {
                text.push_str("  ");
                text.push_str(line);
                text.push('\n');
            }
        }
        text
    }
}

/// Executes a plan with bounded concurrency
pub struct FanOut {
    executor: Arc<dyn CommandExecutor>,
    parallelism: usize,
}

impl FanOut {
    pub fn new(executor: Arc<dyn CommandExecutor>, parallelism: usize) -> Self {
        Self {
            executor,
            parallelism: parallelism.max(1),
        }
    }

    /// Run every command and wait for all of them; `accepted` exit codes count as success
    pub async fn run(&self, plan: Vec<NodeCommand>, accepted: &[i32]) -> FanOutReport {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let accepted: Arc<[i32]> = Arc::from(accepted);
        let mut tasks = JoinSet::new();

        for (index, step) in plan.iter().cloned().enumerate() {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let accepted = accepted.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let target = CommandTarget::host(step.node.address.clone());
                debug!("Fan-out to {} ({})", step.node.address, step.node.role);
                let outcome = match executor.execute(&target, &step.command).await {
                    Ok(out) => NodeOutcome {
                        address: step.node.address,
                        role: step.node.role.to_string(),
                        success: out.accepted(&accepted),
                        exit_code: Some(out.exit_code),
                        output: out.output,
                    },
                    Err(e) => NodeOutcome {
                        address: step.node.address,
                        role: step.node.role.to_string(),
                        success: false,
                        exit_code: None,
                        output: e.to_string(),
                    },
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<NodeOutcome>> = vec![None; plan.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if !outcome.success {
                        warn!(
                            "Node {} failed: exit={:?} {}",
                            outcome.address,
                            outcome.exit_code,
                            outcome.output.trim()
                        );
                    }
                    slots[index] = Some(outcome);
                }
                Err(e) => warn!("Fan-out task aborted: {}", e),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(plan)
            .map(|(slot, step)| {
                slot.unwrap_or_else(|| NodeOutcome {
                    address: step.node.address,
                    role: step.node.role.to_string(),
                    success: false,
                    exit_code: None,
                    output: "task aborted before reporting".into(),
                })
            })
            .collect();

        FanOutReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::NodeRole;

    fn outcome(address: &str, success: bool, exit_code: Option<i32>, output: &str) -> NodeOutcome {
        NodeOutcome {
            address: address.into(),
            role: NodeRole::Worker.to_string(),
            success,
            exit_code,
            output: output.into(),
        }
    }

    #[test]
    fn test_render_in_plan_order() {
        let report = FanOutReport {
            outcomes: vec![
                outcome("10.0.0.2", true, Some(0), ""),
                outcome("10.0.0.3", false, Some(255), "Connection refused"),
                outcome("10.0.0.4", false, None, "timed out"),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert!(!report.all_succeeded());
        assert!(matches!(
            report.check(),
            Err(PqdagError::PartialFanOut { succeeded: 1, total: 3 })
        ));
        assert_eq!(
            report.render("Cleared"),
            "Cleared 10.0.0.2\n\
             Warning: 10.0.0.3 returned exit code 255\n  Connection refused\n\
             Failed: 10.0.0.4\n  timed out\n"
        );
    }
}
