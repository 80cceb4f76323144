//! Assignment artifact parsing
//!
//! The partitioner writes one line per fragment: `<fragment-id> <machine-id> ...`.
//! Only the second token matters for the tally.
//!
//! Tolerance policy: blank lines are ignored, and non-blank lines with fewer
//! than two tokens or a non-numeric machine id are skipped and counted in
//! `skipped_lines`. A fragment id that appears on several lines is tallied
//! on every line and counted once per repeat in `duplicate_fragments`; the
//! partitioner documents no rule for choosing between repeats.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::warn;

use crate::error::{PqdagError, Result};

/// Fragments counted per machine id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentTally {
    /// Ordered by machine id
    pub per_machine: BTreeMap<u32, u64>,
    /// Well-formed lines
    pub assigned_lines: u64,
    /// Non-blank lines left out
    pub skipped_lines: u64,
    /// Repeats of an already-seen fragment id
    pub duplicate_fragments: u64,
}

impl AssignmentTally {
    /// Distinct machine ids
    pub fn machines(&self) -> usize {
        self.per_machine.len()
    }
}

/// Tally an assignment artifact's content
pub fn parse_assignment(content: &str) -> AssignmentTally {
    let mut tally = AssignmentTally::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let Some(fragment) = tokens.next() else {
            continue;
        };
        let Some(machine_id) = tokens.next().and_then(|t| t.parse::<u32>().ok()) else {
            tally.skipped_lines += 1;
            continue;
        };

        *tally.per_machine.entry(machine_id).or_insert(0) += 1;
        tally.assigned_lines += 1;
        if !seen.insert(fragment) {
            tally.duplicate_fragments += 1;
        }
    }

    tally
}

/// Read and tally the artifact; `None` when it does not exist yet
pub async fn read_assignment(path: &Path) -> Result<Option<AssignmentTally>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PqdagError::io(path, e)),
    };

    let tally = parse_assignment(&content);
    if tally.skipped_lines > 0 {
        warn!(
            "Skipped {} malformed lines in {}",
            tally.skipped_lines,
            path.display()
        );
    }
    if tally.duplicate_fragments > 0 {
        warn!(
            "{} fragment ids repeat in {}; every line was tallied",
            tally.duplicate_fragments,
            path.display()
        );
    }
    Ok(Some(tally))
}
