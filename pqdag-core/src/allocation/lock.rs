//! At most one pipeline per dataset
//!
//! Stages rewrite the shared artifact tree in place, so a second run for a
//! dataset is refused while the first holds its guard.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{PqdagError, Result};

/// Set of datasets with a pipeline in flight
#[derive(Debug, Clone, Default)]
pub struct DatasetLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `dataset`, failing fast if another pipeline holds it
    pub fn try_acquire(&self, dataset: &str) -> Result<DatasetGuard> {
        if !self.held.lock().insert(dataset.to_string()) {
            return Err(PqdagError::PipelineBusy {
                dataset: dataset.to_string(),
            });
        }
        debug!("Pipeline lock taken for {}", dataset);
        Ok(DatasetGuard {
            held: self.held.clone(),
            dataset: dataset.to_string(),
        })
    }

    pub fn is_held(&self, dataset: &str) -> bool {
        self.held.lock().contains(dataset)
    }
}

/// Releases the dataset on drop
#[derive(Debug)]
pub struct DatasetGuard {
    held: Arc<Mutex<HashSet<String>>>,
    dataset: String,
}

impl Drop for DatasetGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.dataset);
        debug!("Pipeline lock released for {}", self.dataset);
    }
}
