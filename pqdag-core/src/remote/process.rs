//! Process-backed executor
//!
//! Launches `docker exec`, `sh -c` or `ssh` child processes, streams their
//! merged output into the log while they run, and bounds each one with a
//! deadline.

use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::executor::{CommandExecutor, CommandOutput, CommandTarget};
use super::noise::strip_transport_noise;
use crate::config::{ControlConfig, RemoteConfig};
use crate::error::{PqdagError, Result};
use crate::metrics::standard;

/// Executor that runs real child processes
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    remote: RemoteConfig,
    container: String,
}

impl ProcessExecutor {
    /// Create an executor from the shared configuration
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            remote: config.remote.clone(),
            container: config.sandbox.container.clone(),
        }
    }

    /// Full argument vector used to run `command` on `target`
    pub fn argv(&self, target: &CommandTarget, command: &str) -> Vec<String> {
        match target {
            CommandTarget::Sandbox => vec![
                "docker".into(),
                "exec".into(),
                self.container.clone(),
                "bash".into(),
                "-c".into(),
                command.into(),
            ],
            CommandTarget::Local => vec!["sh".into(), "-c".into(), command.into()],
            CommandTarget::Host(address) => {
                let mut argv = vec![
                    "ssh".to_string(),
                    "-i".into(),
                    self.remote.identity_file().display().to_string(),
                    "-o".into(),
                    "BatchMode=yes".into(),
                    "-o".into(),
                    format!("ConnectTimeout={}", self.remote.connect_timeout.as_secs().max(1)),
                ];
                if self.remote.strict_host_keys {
                    argv.extend(["-o".into(), "StrictHostKeyChecking=yes".into()]);
                } else {
                    argv.extend([
                        "-o".into(),
                        "StrictHostKeyChecking=no".into(),
                        "-o".into(),
                        "UserKnownHostsFile=/dev/null".into(),
                    ]);
                }
                argv.extend([
                    "-o".into(),
                    "LogLevel=ERROR".into(),
                    format!("{}@{}", self.remote.user, address),
                    command.into(),
                ]);
                argv
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, target: &CommandTarget, command: &str) -> Result<CommandOutput> {
        let argv = self.argv(target, command);
        let (program, args) = argv.split_first().ok_or_else(|| PqdagError::Internal {
            message: "empty argument vector".into(),
        })?;

        let label = target.to_string();
        debug!("Executing on {}: {}", label, command);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PqdagError::Spawn {
                target: label.clone(),
                reason: e.to_string(),
            })?;
        standard::REMOTE_COMMANDS.inc();
        let start = Instant::now();

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = self.remote.command_timeout;
        let verbose = matches!(target, CommandTarget::Sandbox);
        let finished = timeout(deadline, collect(&mut child, rx, &label, verbose)).await;
        standard::REMOTE_COMMAND_DURATION.observe_since(start);

        match finished {
            Ok(Ok((status, combined))) => {
                let output = match target {
                    CommandTarget::Host(_) => strip_transport_noise(&combined),
                    _ => combined,
                };
                let exit_code = exit_code(status);
                debug!(
                    "Command on {} exited with {} after {:?}",
                    label,
                    exit_code,
                    start.elapsed()
                );
                Ok(CommandOutput::new(exit_code, output))
            }
            Ok(Err(e)) => Err(PqdagError::Spawn {
                target: label,
                reason: format!("wait failed: {e}"),
            }),
            Err(_) => {
                standard::REMOTE_TIMEOUTS.inc();
                warn!("Command on {} exceeded {:?}, killing it", label, deadline);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command on {}: {}", label, e);
                }
                Err(PqdagError::CommandTimeout {
                    target: label,
                    timeout_secs: deadline.as_secs(),
                })
            }
        }
    }
}

/// Push every line of `reader` into the shared channel as it arrives
///
/// Lines are decoded lossily and the pipe is always drained to EOF.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if !open {
                    continue;
                }
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                open = tx.send(line).is_ok();
            }
            Err(e) => {
                debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
}

async fn collect(
    child: &mut Child,
    mut rx: mpsc::UnboundedReceiver<String>,
    label: &str,
    verbose: bool,
) -> std::io::Result<(ExitStatus, String)> {
    let mut combined = String::new();
    while let Some(line) = rx.recv().await {
        if verbose {
            info!("[{}] {}", label, line);
        } else {
            debug!("[{}] {}", label, line);
        }
        combined.push_str(&line);
        combined.push('\n');
    }
    let status = child.wait().await?;
    Ok((status, combined))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn executor() -> ProcessExecutor {
        ProcessExecutor::new(&ControlConfig::default())
    }

    #[test]
    fn test_ssh_argv_disables_host_keys_by_default() {
        let argv = executor().argv(&CommandTarget::host("10.0.0.2"), "pkill -9 -f 'worker.jar'");
        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(argv.contains(&"ubuntu@10.0.0.2".to_string()));
        assert_eq!(argv.last().unwrap(), "pkill -9 -f 'worker.jar'");
    }

    #[test]
    fn test_ssh_argv_strict_mode() {
        let mut config = ControlConfig::default();
        config.remote.strict_host_keys = true;
        let argv = ProcessExecutor::new(&config).argv(&CommandTarget::host("h"), "true");
        assert!(argv.contains(&"StrictHostKeyChecking=yes".to_string()));
        assert!(!argv.contains(&"UserKnownHostsFile=/dev/null".to_string()));
    }

    #[test]
    fn test_sandbox_argv() {
        let argv = executor().argv(&CommandTarget::Sandbox, "echo hi");
        assert_eq!(argv, ["docker", "exec", "pqdag-allocation", "bash", "-c", "echo hi"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_exit_code_and_merged_output() {
        let out = executor()
            .execute(&CommandTarget::Local, "echo out; echo err 1>&2; exit 3")
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_invalid_utf8_keeps_draining() {
        let out = executor()
            .execute(
                &CommandTarget::Local,
                "printf 'first\\n\\377bad\\n'; i=0; while [ $i -lt 20000 ]; do echo line$i; i=$((i+1)); done; echo done",
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.output.starts_with("first\n\u{FFFD}bad\n"));
        assert!(out.output.contains("line19999\n"));
        assert!(out.output.ends_with("done\n"));
        assert_eq!(out.output.lines().count(), 20003);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_timeout_kills_command() {
        let mut config = ControlConfig::default();
        config.remote.command_timeout = Duration::from_millis(200);
        let result = ProcessExecutor::new(&config)
            .execute(&CommandTarget::Local, "sleep 5")
            .await;
        assert!(matches!(result, Err(PqdagError::CommandTimeout { .. })));
    }
}
