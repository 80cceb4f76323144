//! Shared fixtures for integration tests
//!
//! `ScriptedExecutor` records every command it is asked to run and answers
//! from a list of scripted replies, so no real host or container is needed.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use pqdag_core::config::ControlConfig;
use pqdag_core::error::{PqdagError, Result};
use pqdag_core::remote::{CommandExecutor, CommandOutput, CommandTarget};

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub target: CommandTarget,
    pub command: String,
    pub at: Instant,
}

#[derive(Debug, Clone)]
enum Reply {
    Exit(i32, String),
    LaunchFailure,
}

#[derive(Debug, Clone)]
struct Rule {
    target: Option<CommandTarget>,
    needle: String,
    reply: Reply,
}

/// Executor double; unmatched commands exit 0 with no output
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Option<Duration>>,
    effects: Mutex<Vec<(String, Effect)>>,
}

type Effect = Arc<dyn Fn() + Send + Sync>;

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Commands containing `needle` exit with `code`
    pub fn reply(&self, needle: &str, code: i32, output: &str) {
        self.rules.lock().push(Rule {
            target: None,
            needle: needle.into(),
            reply: Reply::Exit(code, output.into()),
        });
    }

    /// Commands containing `needle` on `address` exit with `code`
    pub fn reply_on(&self, address: &str, needle: &str, code: i32, output: &str) {
        self.rules.lock().push(Rule {
            target: Some(CommandTarget::host(address)),
            needle: needle.into(),
            reply: Reply::Exit(code, output.into()),
        });
    }

    /// Every command on `address` fails to launch
    pub fn unreachable(&self, address: &str) {
        self.rules.lock().push(Rule {
            target: Some(CommandTarget::host(address)),
            needle: String::new(),
            reply: Reply::LaunchFailure,
        });
    }

    /// Run `effect` whenever a command containing `needle` executes
    pub fn on_run(&self, needle: &str, effect: impl Fn() + Send + Sync + 'static) {
        self.effects.lock().push((needle.into(), Arc::new(effect)));
    }

    /// Sleep this long inside every command
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded calls whose command contains `needle`
    pub fn calls_matching(&self, needle: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.command.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, target: &CommandTarget, command: &str) -> Result<CommandOutput> {
        self.calls.lock().push(Call {
            target: target.clone(),
            command: command.to_string(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let effects: Vec<Effect> = self
            .effects
            .lock()
            .iter()
            .filter(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, effect)| effect.clone())
            .collect();
        for effect in effects {
            effect();
        }

        let reply = self
            .rules
            .lock()
            .iter()
            .find(|rule| {
                rule.target.as_ref().map_or(true, |t| t == target) && command.contains(&rule.needle)
            })
            .map(|rule| rule.reply.clone());

        match reply {
            Some(Reply::Exit(code, output)) => Ok(CommandOutput::new(code, output)),
            Some(Reply::LaunchFailure) => Err(PqdagError::Spawn {
                target: target.to_string(),
                reason: "connection refused".into(),
            }),
            None => Ok(CommandOutput::new(0, "")),
        }
    }
}

/// Config rooted in `dir` with near-zero waits
pub fn test_config(dir: &Path) -> ControlConfig {
    let mut config = ControlConfig::default();
    config.layout.workspace_root = dir.to_path_buf();
    config.remote.identity_source = dir.join("missing-identity");
    config.remote.identity_dir = dir.join(".ssh");
    config.cluster.master_file = dir.join("master");
    config.cluster.workers_file = dir.join("workers");
    config.cluster.client_address = "10.0.0.9".into();
    config.cluster.control_host = "172.17.0.1".into();
    config.cluster.restart_quiescence = Duration::from_millis(10);
    config.cluster.clear_quiescence = Duration::from_millis(10);
    config.cluster.cold_restart_delay = Duration::ZERO;
    config.query.settle_delay = Duration::ZERO;
    config
}

/// Write the master and workers records
pub fn write_membership(dir: &Path, master: &str, workers: &[&str]) {
    std::fs::write(dir.join("master"), format!("{master}\n")).unwrap();
    let mut record = workers.join("\n");
    record.push('\n');
    std::fs::write(dir.join("workers"), record).unwrap();
}

/// Write `lines` numbered lines to `path`, creating parents
pub fn write_lines(path: &Path, lines: usize) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let body: String = (0..lines).map(|i| format!("{i} 1.0\n")).collect();
    std::fs::write(path, body).unwrap();
}

/// Write the three allocation artifacts plus the runtime config
pub fn write_artifacts(config: &ControlConfig, stat_lines: usize, graph_lines: usize, assignment: &str) {
    let layout = &config.layout;
    write_lines(&layout.stat_file(), stat_lines);
    write_lines(&layout.graph_file(), graph_lines);
    std::fs::write(layout.assignment_file(), assignment).unwrap();
    let runtime = layout.runtime_config_file();
    std::fs::create_dir_all(runtime.parent().unwrap()).unwrap();
    std::fs::write(runtime, "dataset: watdiv\n").unwrap();
}
