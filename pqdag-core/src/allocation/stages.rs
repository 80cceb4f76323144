//! Pipeline stages and the sandbox commands that run them
//!
//! Sandbox paths: `<sandbox>/allocation` holds the stage scripts and the
//! runtime config, `<sandbox>/storage` holds fragments and results.
//! Fragmentation is the exception: it starts its own throwaway container
//! from the controller host with the storage directories mounted.

use std::fmt;

use crate::config::ControlConfig;
use crate::remote::CommandTarget;

/// One external computation in the allocation pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Encode the raw triples and split them into fragment files
    Fragmentation,
    /// Write the runtime configuration for a dataset
    GenerateConfig { dataset: String },
    /// Per-fragment statistics (MPI)
    Statistics,
    /// Weighted fragment adjacency graph from the statistics
    GraphGeneration,
    /// Split the graph into one part per machine
    Partitioning { num_machines: u32 },
    /// Ship every fragment to its machine
    Distribution,
}

impl Stage {
    /// Stages of an allocation run, in order
    pub fn allocation(dataset: &str, num_machines: u32) -> Vec<Stage> {
        vec![
            Stage::GenerateConfig {
                dataset: dataset.to_string(),
            },
            Stage::Statistics,
            Stage::GraphGeneration,
            Stage::Partitioning { num_machines },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fragmentation => "fragmentation",
            Stage::GenerateConfig { .. } => "generate-config",
            Stage::Statistics => "statistics",
            Stage::GraphGeneration => "graph-generation",
            Stage::Partitioning { .. } => "partitioning",
            Stage::Distribution => "distribution",
        }
    }

    /// Where the stage command runs
    pub fn target(&self) -> CommandTarget {
        match self {
            Stage::Fragmentation => CommandTarget::Local,
            _ => CommandTarget::Sandbox,
        }
    }

    /// Shell command executed on the stage's target
    pub fn command(&self, config: &ControlConfig) -> String {
        let layout = &config.layout;
        let root = layout.in_sandbox("");
        let root = root.trim_end_matches('/');
        let scripts = layout.in_sandbox("allocation");
        let results = layout.in_sandbox("storage/allocation_results");

        match self {
            Stage::Fragmentation => format!(
                "docker run --rm --user \"$(id -u):$(id -g)\" \
                 -v {raw}:/rawdata -v {bin}:/bindata -v {out}:/outputdata \
                 {image} /rawdata/ /bindata/data.nt",
                raw = layout.rawdata_dir().display(),
                bin = layout.bindata_dir().display(),
                out = layout.fragments_dir().display(),
                image = config.sandbox.fragmenter_image,
            ),
            Stage::GenerateConfig { dataset } => {
                format!("python3 {scripts}/generate_config.py {dataset} {root}")
            }
            Stage::Statistics => format!(
                "cd {scripts} && mpiexec -n {procs} python3 stat_MPI.py {fragments} {results}/db",
                procs = config.sandbox.mpi_processes,
                fragments = layout.in_sandbox("storage/outputdata"),
            ),
            Stage::GraphGeneration => format!(
                "cd {scripts} && python3 generate_fragments_graph.py \
                 {results}/db.stat {results}/fragments_graph.quad"
            ),
            Stage::Partitioning { num_machines } => format!(
                "cd {scripts} && python3 allocation_approaches/weighted_metis.py \
                 {results}/fragments_graph.quad {results}/affectation_weighted_metis.txt {num_machines}"
            ),
            Stage::Distribution => format!(
                "python3 {scripts}/distribute_fragments.py --config_file {scripts}/config_runtime.yaml"
            ),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_order() {
        let names: Vec<_> = Stage::allocation("watdiv", 3).iter().map(Stage::name).collect();
        assert_eq!(
            names,
            ["generate-config", "statistics", "graph-generation", "partitioning"]
        );
    }

    #[test]
    fn test_fragmentation_runs_on_host_with_mounts() {
        let config = ControlConfig::default();
        assert_eq!(Stage::Fragmentation.target(), CommandTarget::Local);
        assert_eq!(Stage::Statistics.target(), CommandTarget::Sandbox);
        assert_eq!(
            Stage::Fragmentation.command(&config),
            "docker run --rm --user \"$(id -u):$(id -g)\" \
             -v /app/storage/rawdata:/rawdata -v /app/storage/bindata:/bindata \
             -v /app/storage/outputdata:/outputdata pqdag-fragmenter /rawdata/ /bindata/data.nt"
        );
    }

    #[test]
    fn test_commands_use_sandbox_paths() {
        let config = ControlConfig::default();
        assert_eq!(
            Stage::GenerateConfig { dataset: "watdiv".into() }.command(&config),
            "python3 /app/allocation/generate_config.py watdiv /app"
        );
        assert_eq!(
            Stage::Statistics.command(&config),
            "cd /app/allocation && mpiexec -n 4 python3 stat_MPI.py \
             /app/storage/outputdata /app/storage/allocation_results/db"
        );
        assert!(Stage::Partitioning { num_machines: 5 }
            .command(&config)
            .ends_with("affectation_weighted_metis.txt 5"));
    }
}
