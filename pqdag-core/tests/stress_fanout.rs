//! Stress tests for the bounded node fan-out
//!
//! Many slow nodes, a small slot count, failures sprinkled throughout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pqdag_core::cluster::{ClusterNode, FanOut, NodeCommand, NodeRole};
use pqdag_core::error::{PqdagError, Result};
use pqdag_core::remote::{CommandExecutor, CommandOutput, CommandTarget};

/// Sleeps per command and remembers the highest concurrency it saw
#[derive(Default)]
struct SlowExecutor {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CommandExecutor for SlowExecutor {
    async fn execute(&self, target: &CommandTarget, _command: &str) -> Result<CommandOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        // Later nodes finish first
        let index: u64 = target
            .to_string()
            .rsplit('.')
            .next()
            .and_then(|octet| octet.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(5 + (64 - index.min(64)) / 4)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match index % 10 {
            3 => Ok(CommandOutput::new(255, "Connection reset")),
            7 => Err(PqdagError::CommandTimeout {
                target: target.to_string(),
                timeout_secs: 1,
            }),
            _ => Ok(CommandOutput::new(index as i32 % 2, "")),
        }
    }
}

fn plan(nodes: usize) -> Vec<NodeCommand> {
    (1..=nodes)
        .map(|i| NodeCommand {
            node: ClusterNode {
                address: format!("10.0.1.{i}"),
                role: NodeRole::Worker,
            },
            command: "pkill -9 -f '[w]orker.jar'".into(),
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_fanout_respects_slot_limit_and_order() {
    let executor = Arc::new(SlowExecutor::default());
    let fanout = FanOut::new(executor.clone(), 8);

    let start = Instant::now();
    let report = fanout.run(plan(64), &[0, 1]).await;
    let elapsed = start.elapsed();

    assert_eq!(report.total(), 64);
    assert!(executor.peak.load(Ordering::SeqCst) <= 8);
    assert_eq!(executor.in_flight.load(Ordering::SeqCst), 0);
    // 64 commands of at least 5ms over 8 slots
    assert!(elapsed >= Duration::from_millis(40));

    for (i, outcome) in report.outcomes.iter().enumerate() {
        let index = i + 1;
        assert_eq!(outcome.address, format!("10.0.1.{index}"));
        assert_eq!(outcome.success, !matches!(index % 10, 3 | 7), "node {index}");
    }
    // 7 nodes end in 3, 6 in 7
    assert_eq!(report.succeeded(), 51);
    assert!(matches!(
        report.check(),
        Err(PqdagError::PartialFanOut { succeeded: 51, total: 64 })
    ));
}

#[tokio::test]
async fn stress_fanout_single_slot_is_sequential() {
    let executor = Arc::new(SlowExecutor::default());
    let fanout = FanOut::new(executor.clone(), 1);

    let report = fanout.run(plan(12), &[0, 1]).await;

    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);
    assert_eq!(report.total(), 12);
    assert_eq!(report.succeeded(), 10);
}

#[tokio::test]
async fn stress_fanout_empty_plan() {
    let fanout = FanOut::new(Arc::new(SlowExecutor::default()), 4);
    let report = fanout.run(Vec::new(), &[0]).await;

    assert_eq!(report.total(), 0);
    assert!(report.check().is_ok());
}
