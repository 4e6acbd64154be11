use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage_name: &str) -> StageTimer {
        StageTimer {
            stage: stage_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            failed: false,
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_run_success(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.runs_succeeded += 1;
        }
    }

    pub fn record_run_failure(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.runs_failed += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

/// Records the stage duration when dropped.
pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    failed: bool,
    recorded: bool,
}

impl StageTimer {
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        let duration_ms = duration.as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            if self.failed {
                metrics.failures += 1;
            }
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms,
            failed = self.failed,
            "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        runs_succeeded = snapshot.runs_succeeded,
        runs_failed = snapshot.runs_failed,
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            failures = metrics.failures,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP imageci_runs_succeeded_total Pipeline runs that succeeded\n");
        output.push_str("# TYPE imageci_runs_succeeded_total counter\n");
        let _ = writeln!(output, "imageci_runs_succeeded_total {}", self.runs_succeeded);
        output.push_str("# HELP imageci_runs_failed_total Pipeline runs that failed\n");
        output.push_str("# TYPE imageci_runs_failed_total counter\n");
        let _ = writeln!(output, "imageci_runs_failed_total {}", self.runs_failed);
        output.push_str("# HELP imageci_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE imageci_stage_calls_total counter\n");
        output.push_str("# HELP imageci_stage_failures_total Stage failure count\n");
        output.push_str("# TYPE imageci_stage_failures_total counter\n");
        output.push_str(
            "# HELP imageci_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE imageci_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP imageci_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE imageci_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            let _ = writeln!(
                output,
                "imageci_stage_calls_total{{stage=\"{stage}\"}} {}",
                metrics.calls
            );
            let _ = writeln!(
                output,
                "imageci_stage_failures_total{{stage=\"{stage}\"}} {}",
                metrics.failures
            );
            let _ = writeln!(
                output,
                "imageci_stage_duration_seconds_total{{stage=\"{stage}\"}} {:.6}",
                metrics.total_duration_ms / 1_000.0
            );
            let _ = writeln!(
                output,
                "imageci_stage_duration_seconds_max{{stage=\"{stage}\"}} {:.6}",
                metrics.max_duration_ms / 1_000.0
            );
        }
        output.push_str("# HELP imageci_pipeline_duration_seconds Total pipeline duration\n");
        output.push_str("# TYPE imageci_pipeline_duration_seconds gauge\n");
        let _ = writeln!(
            output,
            "imageci_pipeline_duration_seconds {:.6}",
            self.total_duration_ms / 1_000.0
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        let collector = MetricsCollector::new();
        {
            let _timer = collector.start_stage("build");
        }
        {
            let mut timer = collector.start_stage("build");
            timer.mark_failed();
        }
        let snapshot = collector.snapshot();
        let build = snapshot.stages.get("build").unwrap();
        assert_eq!(build.calls, 2);
        assert_eq!(build.failures, 1);
    }

    #[test]
    fn prometheus_output_lists_stages() {
        let collector = MetricsCollector::new();
        drop(collector.start_stage("test"));
        collector.record_run_failure();
        let prom = collector.snapshot().to_prometheus();
        assert!(prom.contains("imageci_stage_calls_total{stage=\"test\"} 1"));
        assert!(prom.contains("imageci_runs_failed_total 1"));
    }
}
