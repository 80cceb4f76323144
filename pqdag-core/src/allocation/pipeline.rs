//! Allocation pipeline orchestration
//!
//! Runs the stages strictly in order inside the sandbox. The first stage that
//! exits non-zero aborts the run and its captured output becomes the error.
//! Results are always rebuilt from the artifacts on disk.
//!
//! Fragmentation fills the fragments directory the statistics stage reads.
//! It runs separately, before any allocation.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::aggregator::{aggregate, DistributionSummary};
use super::cleanup::{clean_transient_artifacts, empty_dirs};
use super::fragmentation::{count_fragments, parse_report};
use super::lock::DatasetLocks;
use super::stages::Stage;
use super::statistics;
use crate::cluster::NodeRegistry;
use crate::config::ControlConfig;
use crate::error::{PqdagError, Result};
use crate::metrics::standard;
use crate::remote::{safe_token, CommandExecutor, CommandOutput};
use crate::status::{AllocationResponse, FragmentationResult};

/// Lock key held by fragmentation; never a valid dataset name
const FRAGMENTATION_LOCK: &str = "<fragmentation>";

/// Allocation pipeline orchestrator
pub struct AllocationPipeline {
    config: Arc<ControlConfig>,
    executor: Arc<dyn CommandExecutor>,
    registry: NodeRegistry,
    locks: DatasetLocks,
}

impl AllocationPipeline {
    /// Create a new pipeline
    pub fn new(config: Arc<ControlConfig>, executor: Arc<dyn CommandExecutor>) -> Self {
        let registry = NodeRegistry::new(&config.cluster);
        Self {
            config,
            executor,
            registry,
            locks: DatasetLocks::new(),
        }
    }

    /// Locks guarding the artifact tree
    pub fn locks(&self) -> &DatasetLocks {
        &self.locks
    }

    /// RunFragmentation: split the raw triples into fragment files
    pub async fn start_fragmentation(&self, clean_after: bool) -> FragmentationResult {
        match self.run_fragmentation(clean_after).await {
            Ok(result) => result,
            Err(e) => {
                error!("Fragmentation failed: {}", e);
                FragmentationResult::failure(&e)
            }
        }
    }

    /// Empty scratch and output, run the fragmenter, then count its fragments
    pub async fn run_fragmentation(&self, clean_after: bool) -> Result<FragmentationResult> {
        let _guard = self.locks.try_acquire(FRAGMENTATION_LOCK)?;
        let layout = &self.config.layout;

        let run_id = Uuid::new_v4();
        standard::PIPELINE_RUNS.inc();
        info!("[run {}] Starting fragmentation", run_id);

        let stale = empty_dirs(&[layout.bindata_dir(), layout.fragments_dir()]).await;
        if stale.failures > 0 {
            warn!(
                "[run {}] {} stale entries survived before fragmentation",
                run_id, stale.failures
            );
        }
        for dir in [layout.bindata_dir(), layout.fragments_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PqdagError::io(&dir, e))?;
        }

        let output = self.run_stage(&Stage::Fragmentation, run_id).await?;
        let mut result = parse_report(&output.output);
        result.fragment_count = count_fragments(&layout.fragments_dir()).await?;

        if clean_after {
            let report = empty_dirs(&[layout.rawdata_dir(), layout.bindata_dir()]).await;
            if report.failures > 0 {
                warn!(
                    "[run {}] Input cleanup left {} entries behind",
                    run_id, report.failures
                );
            }
        }

        info!(
            "[run {}] Fragmentation produced {} fragments from {} triples",
            run_id, result.fragment_count, result.total_triples
        );
        Ok(result)
    }

    /// StartAllocation: config, statistics, graph and partitioning, then results
    pub async fn start_allocation(&self, dataset: &str, num_machines: u32) -> AllocationResponse {
        match self.run_allocation(dataset, num_machines).await {
            Ok(response) => response,
            Err(e) => {
                error!("Allocation for {} failed: {}", dataset, e);
                AllocationResponse::failure(&e)
            }
        }
    }

    /// Run the allocation stages, surfacing the first failure
    pub async fn run_allocation(&self, dataset: &str, num_machines: u32) -> Result<AllocationResponse> {
        let dataset = safe_token("dataset", dataset)?;
        if num_machines == 0 {
            return Err(PqdagError::InvalidRequest {
                reason: "number of machines must be at least 1".into(),
            });
        }
        let _guard = self.locks.try_acquire(dataset)?;

        let run_id = Uuid::new_v4();
        standard::PIPELINE_RUNS.inc();
        info!(
            "[run {}] Starting allocation for dataset {} on {} machines",
            run_id, dataset, num_machines
        );

        let start = Instant::now();
        for stage in Stage::allocation(dataset, num_machines) {
            self.run_stage(&stage, run_id).await?;
        }
        let elapsed = start.elapsed().as_secs_f64();

        let mut response = self.assemble().await?;
        standard::SKIPPED_ASSIGNMENT_LINES.inc_by(response.skipped_lines);
        if let Some(stats) = response.statistics.as_mut() {
            stats.execution_time = Some(elapsed);
        }
        response.message = "Allocation completed successfully".into();

        info!("[run {}] Allocation finished in {:.1}s", run_id, elapsed);
        Ok(response)
    }

    /// DistributeFragments: ship fragments from a previous allocation
    pub async fn distribute_fragments(&self, dataset: &str, clean_after: bool) -> AllocationResponse {
        match self.run_distribution(dataset, clean_after).await {
            Ok(response) => response,
            Err(e) => {
                error!("Distribution for {} failed: {}", dataset, e);
                AllocationResponse::failure(&e)
            }
        }
    }

    /// Requires the runtime config and assignment artifacts on disk
    pub async fn run_distribution(&self, dataset: &str, clean_after: bool) -> Result<AllocationResponse> {
        let dataset = safe_token("dataset", dataset)?;
        let _guard = self.locks.try_acquire(dataset)?;

        let layout = &self.config.layout;
        for required in [layout.runtime_config_file(), layout.assignment_file()] {
            let present = tokio::fs::try_exists(&required)
                .await
                .map_err(|e| PqdagError::io(&required, e))?;
            if !present {
                return Err(PqdagError::MissingArtifact { path: required });
            }
        }

        let run_id = Uuid::new_v4();
        info!("[run {}] Starting distribution for dataset {}", run_id, dataset);

        // Rebind the runtime config to this dataset before shipping
        self.run_stage(
            &Stage::GenerateConfig {
                dataset: dataset.to_string(),
            },
            run_id,
        )
        .await?;
        self.run_stage(&Stage::Distribution, run_id).await?;

        if clean_after {
            let report = clean_transient_artifacts(layout).await;
            if report.failures > 0 {
                warn!(
                    "[run {}] Cleanup left {} entries behind",
                    run_id, report.failures
                );
            }
        }

        Ok(AllocationResponse::message("Distribution completed successfully"))
    }

    /// GetResults: statistics and distribution from the current artifacts
    pub async fn get_results(&self, dataset: &str) -> AllocationResponse {
        let assembled = match safe_token("dataset", dataset) {
            Ok(_) => self.assemble().await,
            Err(e) => Err(e),
        };
        match assembled {
            Ok(mut response) => {
                response.message = "Results loaded".into();
                response
            }
            Err(e) => {
                warn!("Reading results for {} failed: {}", dataset, e);
                AllocationResponse::failure(&e)
            }
        }
    }

    /// Build statistics and distribution from the artifacts on disk
    async fn assemble(&self) -> Result<AllocationResponse> {
        let layout = &self.config.layout;
        let statistics = statistics::collect(layout).await?;
        let DistributionSummary {
            machines,
            skipped_lines,
            duplicate_fragments,
        } = aggregate(&layout.assignment_file(), &self.registry).await?;

        Ok(AllocationResponse {
            statistics: Some(statistics),
            distribution: machines,
            assignment_file: Some(layout.assignment_file().display().to_string()),
            skipped_lines,
            duplicate_fragments,
            ..AllocationResponse::message("")
        })
    }

    /// Run one stage; non-zero exit becomes `StageFailed`
    async fn run_stage(&self, stage: &Stage, run_id: Uuid) -> Result<CommandOutput> {
        let command = stage.command(&self.config);
        info!("[run {}] Stage {}: {}", run_id, stage, command);

        let start = Instant::now();
        let result = self.executor.execute(&stage.target(), &command).await;
        standard::STAGE_DURATION.observe_since(start);

        let output = result.inspect_err(|_| standard::STAGE_FAILURES.inc())?;
        if !output.success() {
            standard::STAGE_FAILURES.inc();
            error!(
                "[run {}] Stage {} exited with {}",
                run_id, stage, output.exit_code
            );
            return Err(PqdagError::StageFailed {
                stage: stage.name(),
                exit_code: output.exit_code,
                output: output.output,
            });
        }

        info!(
            "[run {}] Stage {} completed in {:.1}s",
            run_id,
            stage,
            start.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}
