//! Control-plane configuration
//!
//! A single immutable [`ControlConfig`] is built at startup and handed to
//! every component. Defaults match the reference deployment; each value can
//! be overridden through a `PQDAG_*` environment variable.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PqdagError, Result};
use crate::remote::safe_token;
use crate::{
    DEFAULT_CLEAR_QUIESCENCE_SECS, DEFAULT_COLD_RESTART_DELAY_SECS, DEFAULT_COMMAND_TIMEOUT_SECS,
    DEFAULT_RESTART_QUIESCENCE_SECS,
};

/// Where pipeline artifacts live, seen from the host and from the sandbox
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    /// Workspace root on the controller's filesystem
    pub workspace_root: PathBuf,
    /// The same tree as mounted inside the sandbox container
    pub sandbox_root: PathBuf,
}

impl ArtifactLayout {
    fn results_dir(root: &Path) -> PathBuf {
        root.join("storage").join("allocation_results")
    }

    /// Host path of the per-fragment statistics artifact
    pub fn stat_file(&self) -> PathBuf {
        Self::results_dir(&self.workspace_root).join("db.stat")
    }

    /// Host path of the fragment adjacency graph
    pub fn graph_file(&self) -> PathBuf {
        Self::results_dir(&self.workspace_root).join("fragments_graph.quad")
    }

    /// Host path of the fragment-to-machine assignment
    pub fn assignment_file(&self) -> PathBuf {
        Self::results_dir(&self.workspace_root).join("affectation_weighted_metis.txt")
    }

    /// Uploaded raw triples, input of the fragmenter
    pub fn rawdata_dir(&self) -> PathBuf {
        self.workspace_root.join("storage").join("rawdata")
    }

    /// Fragmenter scratch space for the merged binary input
    pub fn bindata_dir(&self) -> PathBuf {
        self.workspace_root.join("storage").join("bindata")
    }

    /// Fragment files written by the fragmenter
    pub fn fragments_dir(&self) -> PathBuf {
        self.workspace_root.join("storage").join("outputdata")
    }

    /// Host path of the generated runtime configuration
    pub fn runtime_config_file(&self) -> PathBuf {
        self.workspace_root
            .join("backend")
            .join("allocation")
            .join("config_runtime.yaml")
    }

    /// Host directories emptied after a successful distribution
    pub fn transient_dirs(&self) -> Vec<PathBuf> {
        let storage = self.workspace_root.join("storage");
        vec![
            self.fragments_dir(),
            storage.join("allocation_results"),
            storage.join("allocation_temp"),
        ]
    }

    /// Sandbox-side path under the sandbox root
    pub fn in_sandbox(&self, relative: &str) -> String {
        self.sandbox_root.join(relative).display().to_string()
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/app"),
            sandbox_root: PathBuf::from("/app"),
        }
    }
}

/// Containers that confine the fragmenter and the allocation stages
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Name of the running container
    pub container: String,
    /// Processes used by the MPI statistics stage
    pub mpi_processes: u32,
    /// Image started once per fragmentation run
    pub fragmenter_image: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            container: "pqdag-allocation".into(),
            mpi_processes: 4,
            fragmenter_image: "pqdag-fragmenter".into(),
        }
    }
}

/// Secure remote execution settings
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Login user on every node
    pub user: String,
    /// Identity key as mounted (possibly read-only)
    pub identity_source: PathBuf,
    /// Writable directory the identity is staged into
    pub identity_dir: PathBuf,
    /// Verify host keys; disabled in the baseline deployment
    pub strict_host_keys: bool,
    /// SSH connect timeout
    pub connect_timeout: Duration,
    /// Upper bound for any single command
    pub command_timeout: Duration,
}

impl RemoteConfig {
    /// Identity file passed to the secure channel
    pub fn identity_file(&self) -> PathBuf {
        let name = self
            .identity_source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "pqdag".into());
        self.identity_dir.join(name)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".into(),
            identity_source: PathBuf::from("/root/.ssh/pqdag"),
            identity_dir: PathBuf::from("/tmp/.ssh"),
            strict_host_keys: false,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

/// Cluster topology and lifecycle tuning
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Host that runs the start/stop scripts
    pub control_host: String,
    /// Fixed address of the query client node
    pub client_address: String,
    /// Directory holding start-all / stop-all on the control host
    pub scripts_dir: String,
    /// Engine installation directory on every node
    pub install_dir: String,
    /// Master address record (single line)
    pub master_file: PathBuf,
    /// Workers record (one address per line)
    pub workers_file: PathBuf,
    /// Process pattern of the client role
    pub client_process: String,
    /// Process pattern of the master role
    pub master_process: String,
    /// Process pattern of the worker role
    pub worker_process: String,
    /// Wait between stop and start during a restart
    pub restart_quiescence: Duration,
    /// Wait after clearing processes so ports are released
    pub clear_quiescence: Duration,
    /// Concurrent per-node commands during a fan-out
    pub fanout_parallelism: usize,
    /// Delay before the post-query cold restart begins
    pub cold_restart_delay: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            control_host: "172.17.0.1".into(),
            client_address: "192.168.165.191".into(),
            scripts_dir: "/home/ubuntu/mounted_vol/pqdag-gui/storage/scripts".into(),
            install_dir: "/home/ubuntu/pqdag".into(),
            master_file: PathBuf::from("/app/storage/scripts/master"),
            workers_file: PathBuf::from("/app/storage/scripts/workers"),
            client_process: "client.jar".into(),
            master_process: "master.jar".into(),
            worker_process: "worker.jar".into(),
            restart_quiescence: Duration::from_secs(DEFAULT_RESTART_QUIESCENCE_SECS),
            clear_quiescence: Duration::from_secs(DEFAULT_CLEAR_QUIESCENCE_SECS),
            fanout_parallelism: 8,
            cold_restart_delay: Duration::from_secs(DEFAULT_COLD_RESTART_DELAY_SECS),
        }
    }
}

/// Query client invocation
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Java binary on the client node
    pub java_bin: String,
    /// Client jar on the client node
    pub client_jar: String,
    /// Query files root on the client node
    pub queries_dir: String,
    /// Master used when the request names none
    pub default_master: String,
    /// Pause after sweeping stale client processes
    pub settle_delay: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            java_bin: "/opt/jdk-11/bin/java".into(),
            client_jar: "/home/ubuntu/client.jar".into(),
            queries_dir: "/home/ubuntu/queries".into(),
            default_master: "192.168.165.27".into(),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Background worker pool sizing
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// Worker tasks draining the queue
    pub workers: usize,
    /// Jobs that may wait before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 4,
        }
    }
}

/// Complete control-plane configuration
#[derive(Debug, Clone, Default)]
pub struct ControlConfig {
    pub layout: ArtifactLayout,
    pub sandbox: SandboxConfig,
    pub remote: RemoteConfig,
    pub cluster: ClusterConfig,
    pub query: QueryConfig,
    pub background: BackgroundConfig,
}

impl ControlConfig {
    /// Load defaults overlaid with `PQDAG_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load defaults overlaid with values from an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvOverlay { lookup: &lookup };

        env.path("PQDAG_WORKSPACE_ROOT", &mut config.layout.workspace_root);
        env.path("PQDAG_SANDBOX_ROOT", &mut config.layout.sandbox_root);

        env.string("PQDAG_CONTAINER", &mut config.sandbox.container);
        env.parse("PQDAG_MPI_PROCESSES", &mut config.sandbox.mpi_processes)?;
        env.string("PQDAG_FRAGMENTER_IMAGE", &mut config.sandbox.fragmenter_image);

        env.string("PQDAG_REMOTE_USER", &mut config.remote.user);
        env.path("PQDAG_IDENTITY_SOURCE", &mut config.remote.identity_source);
        env.path("PQDAG_IDENTITY_DIR", &mut config.remote.identity_dir);
        env.parse("PQDAG_STRICT_HOST_KEYS", &mut config.remote.strict_host_keys)?;
        env.secs("PQDAG_CONNECT_TIMEOUT_SECS", &mut config.remote.connect_timeout)?;
        env.secs("PQDAG_COMMAND_TIMEOUT_SECS", &mut config.remote.command_timeout)?;

        env.string("PQDAG_CONTROL_HOST", &mut config.cluster.control_host);
        env.string("PQDAG_CLIENT_ADDRESS", &mut config.cluster.client_address);
        env.string("PQDAG_SCRIPTS_DIR", &mut config.cluster.scripts_dir);
        env.string("PQDAG_INSTALL_DIR", &mut config.cluster.install_dir);
        env.path("PQDAG_MASTER_FILE", &mut config.cluster.master_file);
        env.path("PQDAG_WORKERS_FILE", &mut config.cluster.workers_file);
        env.string("PQDAG_CLIENT_PROCESS", &mut config.cluster.client_process);
        env.string("PQDAG_MASTER_PROCESS", &mut config.cluster.master_process);
        env.string("PQDAG_WORKER_PROCESS", &mut config.cluster.worker_process);
        env.secs("PQDAG_RESTART_QUIESCENCE_SECS", &mut config.cluster.restart_quiescence)?;
        env.secs("PQDAG_CLEAR_QUIESCENCE_SECS", &mut config.cluster.clear_quiescence)?;
        env.parse("PQDAG_FANOUT_PARALLELISM", &mut config.cluster.fanout_parallelism)?;
        env.secs("PQDAG_COLD_RESTART_DELAY_SECS", &mut config.cluster.cold_restart_delay)?;

        env.string("PQDAG_JAVA_BIN", &mut config.query.java_bin);
        env.string("PQDAG_CLIENT_JAR", &mut config.query.client_jar);
        env.string("PQDAG_QUERIES_DIR", &mut config.query.queries_dir);
        env.string("PQDAG_DEFAULT_MASTER", &mut config.query.default_master);
        env.secs("PQDAG_SETTLE_DELAY_SECS", &mut config.query.settle_delay)?;

        env.parse("PQDAG_BACKGROUND_WORKERS", &mut config.background.workers)?;
        env.parse("PQDAG_BACKGROUND_QUEUE", &mut config.background.queue_capacity)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.cluster.fanout_parallelism == 0 {
            return Err(PqdagError::Config {
                reason: "fan-out parallelism must be at least 1".into(),
            });
        }
        if self.background.workers == 0 || self.background.queue_capacity == 0 {
            return Err(PqdagError::Config {
                reason: "background pool needs at least one worker and one queue slot".into(),
            });
        }
        if self.sandbox.mpi_processes == 0 {
            return Err(PqdagError::Config {
                reason: "MPI process count must be at least 1".into(),
            });
        }
        let image = &self.sandbox.fragmenter_image;
        let image_ok = !image.is_empty()
            && image
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "._-/:@".contains(c));
        if !image_ok {
            return Err(PqdagError::Config {
                reason: format!("fragmenter image {image:?} is not a plain image reference"),
            });
        }
        for process in [
            &self.cluster.client_process,
            &self.cluster.master_process,
            &self.cluster.worker_process,
        ] {
            safe_token("process name", process).map_err(|e| PqdagError::Config {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

struct EnvOverlay<'a, F> {
    lookup: &'a F,
}

impl<F> EnvOverlay<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, slot: &mut String) {
        if let Some(value) = (self.lookup)(key) {
            *slot = value;
        }
    }

    fn path(&self, key: &str, slot: &mut PathBuf) {
        if let Some(value) = (self.lookup)(key) {
            *slot = PathBuf::from(value);
        }
    }

    fn parse<T: FromStr>(&self, key: &str, slot: &mut T) -> Result<()> {
        if let Some(value) = (self.lookup)(key) {
            *slot = value.trim().parse().map_err(|_| PqdagError::Config {
                reason: format!("{key} has unparsable value {value:?}"),
            })?;
        }
        Ok(())
    }

    fn secs(&self, key: &str, slot: &mut Duration) -> Result<()> {
        let mut secs = slot.as_secs_f64();
        self.parse(key, &mut secs)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(PqdagError::Config {
                reason: format!("{key} must be a non-negative number of seconds"),
            });
        }
        *slot = Duration::from_secs_f64(secs);
        Ok(())
    }
}
