//! Fragment allocation
//!
//! Fragmentation, stage orchestration, assignment parsing and result
//! aggregation.

pub mod aggregator;
pub mod assignment;
pub mod cleanup;
pub mod fragmentation;
pub mod lock;
pub mod pipeline;
pub mod stages;
pub mod statistics;

pub use aggregator::{aggregate, summarize, DistributionSummary};
pub use assignment::{parse_assignment, AssignmentTally};
pub use fragmentation::{count_fragments, parse_report};
pub use lock::DatasetLocks;
pub use pipeline::AllocationPipeline;
pub use stages::Stage;
