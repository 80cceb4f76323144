//! Identity staging
//!
//! The mounted SSH identity is often read-only with loose permissions,
//! which ssh refuses. It is copied into a private directory before use.

use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::{PqdagError, Result};

/// Copy the identity into its staging directory with 0700/0600 permissions
pub async fn stage_identity(remote: &RemoteConfig) -> Result<()> {
    let source = &remote.identity_source;
    let dir = &remote.identity_dir;
    let target = remote.identity_file();

    if source == &target {
        return Ok(());
    }

    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        // An identity staged by an earlier run is still usable
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!("Identity source {} missing, reusing staged copy", source.display());
            return Ok(());
        }
        return Err(PqdagError::io(
            source.clone(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "identity file not found"),
        ));
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PqdagError::io(dir.clone(), e))?;
    tokio::fs::copy(source, &target)
        .await
        .map_err(|e| PqdagError::io(target.clone(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| PqdagError::io(dir.clone(), e))?;
        tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| PqdagError::io(target.clone(), e))?;
    }

    debug!("Staged identity at {}", target.display());
    Ok(())
}

/// Stage the identity, logging instead of failing
pub async fn stage_identity_best_effort(remote: &RemoteConfig) {
    if let Err(e) = stage_identity(remote).await {
        warn!("Failed to stage SSH identity, continuing: {}", e);
    }
}
