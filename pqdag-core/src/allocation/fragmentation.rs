//! Fragmenter report parsing and fragment counting
//!
//! The fragmenter prints one line per finished phase, e.g.
//! `Done with Sorting in 0.0997743 sec`, and a closing
//! `Run Finished in 1.47381 sec`. Lines it did not print leave the
//! matching metric unset.

use std::path::{Path, PathBuf};

use crate::error::{PqdagError, Result};
use crate::status::FragmentationResult;

const TRIPLES: &str = "Total number of triples:";
const ENCODING: &str = "Done with data encoding in";
const DICTIONARIES: &str = "Done with dumping dictionaries in";
const SORTING: &str = "Done with Sorting in";
const FRAGMENTATION: &str = "Done with Fragmentation in";
const REENCODING: &str = "Done with Fragments re-encoding in";
const TOTAL: &str = "Run Finished in";

/// Extension of the fragment files the fragmenter writes
pub const FRAGMENT_EXTENSION: &str = "data";

/// Fill a successful result from the fragmenter's output
pub fn parse_report(output: &str) -> FragmentationResult {
    let mut result = FragmentationResult::completed(output);

    result.total_triples = value_after(output, TRIPLES, "records").unwrap_or(0);
    result.encoding_time = value_after(output, ENCODING, "sec");
    result.dictionaries_time = value_after(output, DICTIONARIES, "sec");
    result.sorting_time = value_after(output, SORTING, "sec");
    result.fragmentation_time = value_after(output, FRAGMENTATION, "sec");
    result.reencoding_time = value_after(output, REENCODING, "sec");
    result.execution_time_seconds = value_after(output, TOTAL, "sec").unwrap_or(0.0);

    if result.total_triples > 0 && result.execution_time_seconds > 0.0 {
        result.throughput = (result.total_triples as f64 / result.execution_time_seconds) as u64;
    }
    result
}

/// First `<marker> <number> <unit>` occurrence in `output`
fn value_after<T: std::str::FromStr>(output: &str, marker: &str, unit: &str) -> Option<T> {
    output.match_indices(marker).find_map(|(at, _)| {
        let rest = output[at + marker.len()..].trim_start();
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(end);
        if !tail.trim_start().starts_with(unit) {
            return None;
        }
        number.parse().ok()
    })
}

/// Count fragment files anywhere under `dir`; a missing directory holds none
pub async fn count_fragments(dir: &Path) -> Result<u64> {
    let mut count = 0;
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(PqdagError::io(&current, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PqdagError::io(&current, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PqdagError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path.extension().is_some_and(|ext| ext == FRAGMENT_EXTENSION)
            {
                count += 1;
            }
        }
    }
    Ok(count)
}
