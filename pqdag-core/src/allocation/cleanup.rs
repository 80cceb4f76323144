//! Artifact cleanup
//!
//! Empties the fragment, results and temp directories once fragments live
//! on their machines, and the fragmenter's input and scratch directories
//! around a fragmentation run. The directories themselves are kept. Failures
//! are logged and counted, never returned.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ArtifactLayout;

/// What a cleanup pass managed to remove
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: usize,
}

/// Remove the contents of every transient directory
pub async fn clean_transient_artifacts(layout: &ArtifactLayout) -> CleanupReport {
    empty_dirs(&layout.transient_dirs()).await
}

/// Remove the contents of each directory; missing directories are skipped
pub async fn empty_dirs(dirs: &[PathBuf]) -> CleanupReport {
    let mut report = CleanupReport::default();
    for dir in dirs {
        empty_dir(dir, &mut report).await;
    }

    if report.failures == 0 {
        info!("Cleanup removed {} entries", report.removed);
    } else {
        warn!(
            "Cleanup removed {} entries, {} could not be removed",
            report.removed, report.failures
        );
    }
    report
}

async fn empty_dir(dir: &Path, report: &mut CleanupReport) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            report.failures += 1;
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Cannot read entry in {}: {}", dir.display(), e);
                report.failures += 1;
                break;
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let removed = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match removed {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                report.removed += 1;
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                report.failures += 1;
            }
        }
    }
}
