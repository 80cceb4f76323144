//! Prometheus metrics for monitoring
//!
//! Counters, gauges and histograms rendered in the Prometheus text format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Header and single sample shared by counters and gauges
fn render_scalar(name: &str, help: &str, kind: &str, value: impl std::fmt::Display) -> String {
    format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n")
}

/// Event tally such as stage failures or remote commands issued
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Add a batch, e.g. the skipped lines of one assignment
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        render_scalar(&self.name, &self.help, "counter", self.get())
    }
}

/// Last observed level, e.g. whether the engine cluster is up
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        render_scalar(&self.name, &self.help, "gauge", self.get())
    }
}

/// Histogram for durations in seconds
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Buckets sized for remote commands and pipeline stages (up to an hour)
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0],
        )
    }

    /// Upper bounds in seconds, ascending
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // Sum kept as u64 micros
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the time elapsed since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cumulative buckets, then `+Inf`, sum and count
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            self.name,
            self.count()
        ));

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Standard control-plane metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static PIPELINE_RUNS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_pipeline_runs_total", "Fragmentation and allocation runs started")
    });

    pub static STAGE_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_stage_failures_total", "Pipeline stages that exited non-zero")
    });

    pub static REMOTE_COMMANDS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_remote_commands_total", "Commands launched by the executor")
    });

    pub static REMOTE_TIMEOUTS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_remote_timeouts_total", "Commands killed at their deadline")
    });

    pub static NODES_CLEARED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_nodes_cleared_total", "Nodes whose engine processes were cleared")
    });

    pub static SKIPPED_ASSIGNMENT_LINES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new(
            "pqdag_skipped_assignment_lines_total",
            "Malformed assignment lines left out of the tally",
        )
    });

    pub static COLD_RESTARTS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_cold_restarts_total", "Post-query restarts scheduled")
    });

    pub static COLD_RESTART_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("pqdag_cold_restart_failures_total", "Post-query restarts that failed")
    });

    pub static CLUSTER_RUNNING: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("pqdag_cluster_running", "1 when the last lifecycle operation left the cluster running")
    });

    pub static STAGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("pqdag_stage_duration_seconds", "Pipeline stage wall time")
    });

    pub static REMOTE_COMMAND_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("pqdag_remote_command_duration_seconds", "Executor command wall time")
    });
}

/// Text served at `/metrics`
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::PIPELINE_RUNS.to_prometheus());
    output.push_str(&standard::STAGE_FAILURES.to_prometheus());
    output.push_str(&standard::REMOTE_COMMANDS.to_prometheus());
    output.push_str(&standard::REMOTE_TIMEOUTS.to_prometheus());
    output.push_str(&standard::NODES_CLEARED.to_prometheus());
    output.push_str(&standard::SKIPPED_ASSIGNMENT_LINES.to_prometheus());
    output.push_str(&standard::COLD_RESTARTS.to_prometheus());
    output.push_str(&standard::COLD_RESTART_FAILURES.to_prometheus());

    // Gauges
    output.push_str(&standard::CLUSTER_RUNNING.to_prometheus());

    // Histograms
    output.push_str(&standard::STAGE_DURATION.to_prometheus());
    output.push_str(&standard::REMOTE_COMMAND_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_batches() {
        let skipped = Counter::new("skipped_lines_total", "Skipped lines");
        skipped.inc();
        skipped.inc_by(5);

        assert_eq!(skipped.get(), 6);
        assert_eq!(
            skipped.to_prometheus(),
            "# HELP skipped_lines_total Skipped lines\n# TYPE skipped_lines_total counter\nskipped_lines_total 6\n"
        );
    }

    #[test]
    fn test_gauge_tracks_cluster_state() {
        let running = Gauge::new("cluster_running", "Cluster up");
        running.set(1);
        running.set(0);

        assert_eq!(running.get(), 0);
        assert!(running.to_prometheus().ends_with("# TYPE cluster_running gauge\ncluster_running 0\n"));
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");

        histogram.observe(0.05);
        histogram.observe(4.0);
        histogram.observe(120.0);

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_count 3"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"5\"} 2"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"+Inf\"} 3"));
    }

    #[test]
    fn test_gather_lists_every_family() {
        let text = gather_system_metrics();
        assert!(text.contains("pqdag_pipeline_runs_total"));
        assert!(text.contains("pqdag_cluster_running"));
        assert!(text.contains("pqdag_stage_duration_seconds_count"));
    }
}
