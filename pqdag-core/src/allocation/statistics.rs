//! Artifact statistics
//!
//! Counts are rebuilt from the artifacts every time they are asked for.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::config::ArtifactLayout;
use crate::error::{PqdagError, Result};
use crate::status::AllocationStatistics;

/// Number of lines in `path`; 0 when the file does not exist.
///
/// A final line without a trailing newline still counts.
pub async fn count_lines(path: &Path) -> Result<u64> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PqdagError::io(path, e)),
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last = None;
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| PqdagError::io(path, e))?;
        if read == 0 {
            break;
        }
        lines += buf[..read].iter().filter(|&&b| b == b'\n').count() as u64;
        last = Some(buf[read - 1]);
    }

    if matches!(last, Some(b) if b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

/// Fragment count from the statistics artifact, edge count from the graph
pub async fn collect(layout: &ArtifactLayout) -> Result<AllocationStatistics> {
    let stat_file = layout.stat_file();
    let graph_file = layout.graph_file();

    Ok(AllocationStatistics {
        total_fragments: count_lines(&stat_file).await?,
        total_edges: count_lines(&graph_file).await?,
        execution_time: None,
        stat_file: stat_file.display().to_string(),
        graph_file: graph_file.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_count_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a");

        std::fs::write(&path, "x\ny\n").unwrap();
        assert_eq!(count_lines(&path).await.unwrap(), 2);

        std::fs::write(&path, "x\ny").unwrap();
        assert_eq!(count_lines(&path).await.unwrap(), 2);

        std::fs::write(&path, "").unwrap();
        assert_eq!(count_lines(&path).await.unwrap(), 0);

        assert_eq!(count_lines(&tmp.path().join("missing")).await.unwrap(), 0);
    }
}
