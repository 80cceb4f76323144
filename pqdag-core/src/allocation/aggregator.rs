//! Partition result aggregation
//!
//! Joins the per-machine tally with the workers record to report how many
//! fragments each worker holds.

use std::path::Path;

use super::assignment::{read_assignment, AssignmentTally};
use crate::cluster::NodeRegistry;
use crate::error::Result;
use crate::status::MachineAllocation;

/// Worker address reported when a machine id has no worker in its slot
pub const UNKNOWN_WORKER: &str = "unknown";

/// Load summary built from one assignment artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionSummary {
    /// Ascending by machine id
    pub machines: Vec<MachineAllocation>,
    pub skipped_lines: u64,
    pub duplicate_fragments: u64,
}

impl DistributionSummary {
    /// Sum of fragment counts
    pub fn total_fragments(&self) -> u64 {
        self.machines.iter().map(|m| m.fragment_count).sum()
    }
}

/// Pair each machine id with its worker; machine id `n` is `slots[n - 1]`
pub fn summarize(tally: &AssignmentTally, slots: &[Option<String>]) -> Vec<MachineAllocation> {
    tally
        .per_machine
        .iter()
        .map(|(&machine_id, &fragment_count)| MachineAllocation {
            machine_id,
            fragment_count,
            worker_ip: machine_id
                .checked_sub(1)
                .and_then(|index| slots.get(index as usize))
                .and_then(|slot| slot.clone())
                .unwrap_or_else(|| UNKNOWN_WORKER.to_string()),
        })
        .collect()
}

/// Read the artifact and the workers record and summarize them
pub async fn aggregate(assignment: &Path, registry: &NodeRegistry) -> Result<DistributionSummary> {
    let Some(tally) = read_assignment(assignment).await? else {
        return Ok(DistributionSummary::default());
    };
    let slots = registry.worker_slots().await?;

    Ok(DistributionSummary {
        machines: summarize(&tally, &slots),
        skipped_lines: tally.skipped_lines,
        duplicate_fragments: tally.duplicate_fragments,
    })
}
