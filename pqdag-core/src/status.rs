//! Response payloads returned by every externally observable operation
//!
//! All payloads serialize with camelCase field names.

use serde::{Deserialize, Serialize};

use crate::error::PqdagError;

/// Outcome reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Error,
}

impl OperationStatus {
    pub fn is_success(self) -> bool {
        self == OperationStatus::Success
    }
}

/// Fragment and edge counts rebuilt from the artifacts on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationStatistics {
    pub total_fragments: u64,
    pub total_edges: u64,
    /// Wall time of the stages, only when they ran in this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(rename = "dbStatFile")]
    pub stat_file: String,
    pub graph_file: String,
}

/// Fragments landing on one machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineAllocation {
    /// 1-based machine id from the assignment
    pub machine_id: u32,
    pub fragment_count: u64,
    pub worker_ip: String,
}

/// Result of StartAllocation, DistributeFragments and GetResults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResponse {
    pub status: OperationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<AllocationStatistics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distribution: Vec<MachineAllocation>,
    #[serde(rename = "affectationFile", skip_serializing_if = "Option::is_none")]
    pub assignment_file: Option<String>,
    /// Malformed assignment lines left out of the distribution
    #[serde(default)]
    pub skipped_lines: u64,
    /// Fragment ids that appeared on more than one assignment line
    #[serde(default)]
    pub duplicate_fragments: u64,
}

impl AllocationResponse {
    /// Plain success without any result payload
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            message: message.into(),
            statistics: None,
            distribution: Vec::new(),
            assignment_file: None,
            skipped_lines: 0,
            duplicate_fragments: 0,
        }
    }

    /// Failure; stage output becomes the message when present
    pub fn failure(err: &PqdagError) -> Self {
        let message = match err.output() {
            Some(output) if !output.trim().is_empty() => format!("{}: {}", summary(err), output),
            _ => err.to_string(),
        };
        Self {
            status: OperationStatus::Error,
            ..Self::message(message)
        }
    }
}

fn summary(err: &PqdagError) -> String {
    match err {
        PqdagError::StageFailed { stage, exit_code, .. } => {
            format!("Stage {stage} failed with exit code {exit_code}")
        }
        other => other.to_string(),
    }
}

/// Result of RunFragmentation
///
/// Metrics come from the fragmenter's own report; a phase it did not
/// report stays `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentationResult {
    pub status: OperationStatus,
    pub message: String,
    /// `.data` files found under the fragments directory
    pub fragment_count: u64,
    pub total_triples: u64,
    pub execution_time_seconds: f64,
    /// Triples per second over the whole run, 0 when unknown
    pub throughput: u64,
    #[serde(rename = "dockerOutput")]
    pub output: String,
    pub encoding_time: Option<f64>,
    pub dictionaries_time: Option<f64>,
    pub sorting_time: Option<f64>,
    pub fragmentation_time: Option<f64>,
    pub reencoding_time: Option<f64>,
}

impl FragmentationResult {
    /// Empty successful result carrying the raw fragmenter output
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            message: "Fragmentation completed successfully".into(),
            fragment_count: 0,
            total_triples: 0,
            execution_time_seconds: 0.0,
            throughput: 0,
            output: output.into(),
            encoding_time: None,
            dictionaries_time: None,
            sorting_time: None,
            fragmentation_time: None,
            reencoding_time: None,
        }
    }

    pub fn failure(err: &PqdagError) -> Self {
        let output = err.output().unwrap_or_default().to_string();
        Self {
            status: OperationStatus::Error,
            message: format!("Fragmentation failed: {}", summary(err)),
            ..Self::completed(output)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Per-node result of a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    pub address: String,
    pub role: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Result of a lifecycle operation; never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub status: OperationStatus,
    pub message: String,
    pub output: String,
    /// Per-node detail for fan-out operations, in registry order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeOutcome>,
}

impl ClusterStatus {
    pub fn success(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            message: message.into(),
            output: output.into(),
            nodes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Error,
            message: message.into(),
            output: output.into(),
            nodes: Vec::new(),
        }
    }

    /// Map an error that never produced a response into one
    pub fn failure(operation: &str, err: &PqdagError) -> Self {
        let output = err.output().unwrap_or_default().to_string();
        Self::error(format!("Failed to {operation}: {err}"), output)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of ExecuteQuery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionResponse {
    pub status: OperationStatus,
    pub message: String,
    pub query_file: String,
    pub execution_time_ms: u64,
    pub result_count: usize,
    pub output: String,
    pub results: Vec<String>,
}

impl QueryExecutionResponse {
    pub fn error(
        query_file: impl Into<String>,
        message: impl Into<String>,
        output: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            status: OperationStatus::Error,
            message: message.into(),
            query_file: query_file.into(),
            execution_time_ms,
            result_count: 0,
            output: output.into(),
            results: Vec::new(),
        }
    }

    /// Map an error raised before or while launching the query
    pub fn failure(query_file: impl Into<String>, err: &PqdagError) -> Self {
        let output = err.output().unwrap_or_default().to_string();
        Self::error(query_file, format!("Query execution failed: {err}"), output, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_wire_names() {
        let response = AllocationResponse {
            statistics: Some(AllocationStatistics {
                total_fragments: 500,
                total_edges: 1800,
                execution_time: None,
                stat_file: "db.stat".into(),
                graph_file: "fragments_graph.quad".into(),
            }),
            distribution: vec![MachineAllocation {
                machine_id: 1,
                fragment_count: 3,
                worker_ip: "10.0.0.2".into(),
            }],
            assignment_file: Some("affectation_weighted_metis.txt".into()),
            ..AllocationResponse::message("ok")
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["statistics"]["totalFragments"], 500);
        assert_eq!(json["statistics"]["dbStatFile"], "db.stat");
        assert_eq!(json["statistics"]["graphFile"], "fragments_graph.quad");
        assert!(json["statistics"].get("executionTime").is_none());
        assert_eq!(json["distribution"][0]["workerIp"], "10.0.0.2");
        assert_eq!(json["affectationFile"], "affectation_weighted_metis.txt");
        assert!(json.get("assignmentFile").is_none());
    }

    #[test]
    fn test_fragmentation_failure_keeps_output() {
        let err = PqdagError::StageFailed {
            stage: "fragmentation",
            exit_code: 125,
            output: "Unable to find image 'pqdag-fragmenter:latest' locally\n".into(),
        };
        let result = FragmentationResult::failure(&err);

        assert!(!result.is_success());
        assert_eq!(
            result.message,
            "Fragmentation failed: Stage fragmentation failed with exit code 125"
        );
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["dockerOutput"].as_str().unwrap().contains("Unable to find image"));
        assert_eq!(json["fragmentCount"], 0);
    }

    #[test]
    fn test_stage_failure_message_uses_output() {
        let err = PqdagError::StageFailed {
            stage: "graph-generation",
            exit_code: 1,
            output: "Traceback: db.stat missing".into(),
        };
        let response = AllocationResponse::failure(&err);
        assert_eq!(response.status, OperationStatus::Error);
        assert!(response.message.ends_with("Traceback: db.stat missing"));
    }
}
