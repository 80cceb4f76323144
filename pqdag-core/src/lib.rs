//! PQDAG Core - control plane for a partitioned RDF query engine
//!
//! This crate provides the Rust core for coordinating:
//! - Fragmentation of uploaded triples into fragment files
//! - The fragment allocation pipeline (statistics, graph, partitioning, distribution)
//! - Cluster lifecycle across the client, master and worker nodes
//! - Query execution with cold restarts between runs
//! - Remote command execution in a sandbox or over SSH

pub mod allocation;
pub mod cluster;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod remote;
pub mod runtime;
pub mod status;

pub use allocation::AllocationPipeline;
pub use cluster::{ClusterManager, DatasetSwitch, NodeRegistry, QueryRequest, QueryService};
pub use config::ControlConfig;
pub use control::ControlPlane;
pub use error::PqdagError;
pub use remote::{CommandExecutor, CommandOutput, CommandTarget, ProcessExecutor};

/// Wait between stop and start during a restart, in seconds
pub const DEFAULT_RESTART_QUIESCENCE_SECS: u64 = 2;

/// Wait after clearing processes so ports can be rebound, in seconds
pub const DEFAULT_CLEAR_QUIESCENCE_SECS: u64 = 3;

/// Delay before the post-query cold restart, in seconds
pub const DEFAULT_COLD_RESTART_DELAY_SECS: u64 = 2;

/// Upper bound on a single remote command, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 1800;
