//! Query execution on the client node
//!
//! The query engine is an external jar on the client node. After a
//! successful query a cold restart is queued on the background pool, so the
//! next query starts without warm caches. The caller never hears about that
//! restart.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::lifecycle::{process_pattern, ClusterManager};
use crate::config::ControlConfig;
use crate::error::Result;
use crate::metrics::standard;
use crate::remote::{safe_token, stage_identity_best_effort, CommandExecutor, CommandTarget};
use crate::runtime::BackgroundPool;
use crate::status::{OperationStatus, QueryExecutionResponse};

/// ExecuteQuery arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub dataset: String,
    pub query_file: String,
    /// Plan selected by the client, 0 when absent
    #[serde(default)]
    pub plan_number: Option<u32>,
    /// Master to query; the configured default when absent
    #[serde(default, alias = "masterIp")]
    pub master_address: Option<String>,
}

/// Result lines: those starting with a variable binding or holding an IRI
pub fn parse_results(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('?') || line.contains("http://"))
        .map(String::from)
        .collect()
}

/// Runs queries through the client jar
pub struct QueryService {
    config: Arc<ControlConfig>,
    executor: Arc<dyn CommandExecutor>,
    cluster: Arc<ClusterManager>,
    background: Arc<BackgroundPool>,
}

impl QueryService {
    pub fn new(
        config: Arc<ControlConfig>,
        executor: Arc<dyn CommandExecutor>,
        cluster: Arc<ClusterManager>,
        background: Arc<BackgroundPool>,
    ) -> Self {
        Self {
            config,
            executor,
            cluster,
            background,
        }
    }

    /// ExecuteQuery
    pub async fn execute_query(&self, request: &QueryRequest) -> QueryExecutionResponse {
        match self.run_query(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Query {} failed: {}", request.query_file, e);
                QueryExecutionResponse::failure(&request.query_file, &e)
            }
        }
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<QueryExecutionResponse> {
        let dataset = safe_token("dataset", &request.dataset)?;
        let query_file = safe_token("query file", &request.query_file)?;
        let master = match request.master_address.as_deref() {
            Some(address) => safe_token("master address", address)?,
            None => self.config.query.default_master.as_str(),
        };
        let plan = request.plan_number.unwrap_or(0);

        stage_identity_best_effort(&self.config.remote).await;
        let client = CommandTarget::host(self.config.cluster.client_address.clone());
        self.sweep_stale_clients(&client).await;

        let query = &self.config.query;
        let command = format!(
            "{} -jar {} \"{}\" {}/{}/{} {}",
            query.java_bin, query.client_jar, master, query.queries_dir, dataset, query_file, plan
        );
        info!("Executing query {} on dataset {} via {}", query_file, dataset, client);

        let start = Instant::now();
        let output = self.executor.execute(&client, &command).await?;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        if !output.success() {
            warn!(
                "Query {} exited with {} after {}ms",
                query_file, output.exit_code, execution_time_ms
            );
            return Ok(QueryExecutionResponse::error(
                query_file,
                "Query execution failed",
                output.output,
                execution_time_ms,
            ));
        }

        let results = parse_results(&output.output);
        info!(
            "Query {} returned {} results in {}ms",
            query_file,
            results.len(),
            execution_time_ms
        );
        self.schedule_cold_restart();

        Ok(QueryExecutionResponse {
            status: OperationStatus::Success,
            message: "Query executed successfully".into(),
            query_file: query_file.to_string(),
            execution_time_ms,
            result_count: results.len(),
            output: output.output,
            results,
        })
    }

    /// Kill leftover clients holding the client port, then let it settle
    async fn sweep_stale_clients(&self, client: &CommandTarget) {
        let command = format!(
            "pkill -f '{}' || true",
            process_pattern(&format!("java -jar.*{}", self.config.cluster.client_process))
        );
        if let Err(e) = self.executor.execute(client, &command).await {
            warn!("Failed to sweep stale clients on {}: {}", client, e);
        }
        tokio::time::sleep(self.config.query.settle_delay).await;
    }

    fn schedule_cold_restart(&self) {
        let cluster = self.cluster.clone();
        let delay = self.config.cluster.cold_restart_delay;
        let queued = self.background.submit("cold-restart", async move {
            tokio::time::sleep(delay).await;
            info!("Restarting cluster so the next query runs cold");
            cluster
                .try_restart()
                .await
                .map(|_| ())
                .inspect_err(|_| standard::COLD_RESTART_FAILURES.inc())
        });
        if queued {
            standard::COLD_RESTARTS.inc();
        }
    }
}
