//! Cluster membership and lifecycle
//!
//! Node registry, bounded per-node fan-out, lifecycle management, query
//! execution and engine dataset selection.

pub mod dataset;
pub mod fanout;
pub mod lifecycle;
pub mod query;
pub mod registry;

pub use dataset::DatasetSwitch;
pub use fanout::{FanOut, FanOutReport, NodeCommand};
pub use lifecycle::{ClusterManager, ClusterState};
pub use query::{parse_results, QueryRequest, QueryService};
pub use registry::{ClusterNode, NodeRegistry, NodeRole};
