//! # Metrics
//!
//! Prometheus metrics for one provisioning run.
//!
//! ## Metrics Exposed
//!
//! - `k8s_secret_runs_total{mode}` - Runs started, by mode (`apply`, `destroy`)
//! - `k8s_secret_run_failures_total` - Runs that exited non-zero
//! - `k8s_secret_phase_duration_seconds{phase}` - Duration of each lifecycle phase
//! - `k8s_secret_phase_failures_total{phase}` - Failed lifecycle phases
//! - `k8s_secret_resource_changes_total{change}` - Resource changes reported by the engine
//!
//! The binary exits after one run, so there is no scrape endpoint. When a textfile
//! path is configured the registry is written there in text exposition format for
//! node-exporter's textfile collector.

use crate::engine::OperationSummary;
use anyhow::{Context, Result};
use prometheus::{
    core::Collector, Encoder, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder,
};
use std::path::Path;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RUNS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("k8s_secret_runs_total", "Total number of provisioning runs by mode"),
        &["mode"],
    )
    .expect("Failed to create RUNS_TOTAL metric - this should never happen")
});

static RUN_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "k8s_secret_run_failures_total",
        "Total number of provisioning runs that exited with a failure",
    )
    .expect("Failed to create RUN_FAILURES_TOTAL metric - this should never happen")
});

static PHASE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "k8s_secret_phase_duration_seconds",
            "Duration of lifecycle phases in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["phase"],
    )
    .expect("Failed to create PHASE_DURATION metric - this should never happen")
});

static PHASE_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "k8s_secret_phase_failures_total",
            "Total number of failed lifecycle phases",
        ),
        &["phase"],
    )
    .expect("Failed to create PHASE_FAILURES_TOTAL metric - this should never happen")
});

static RESOURCE_CHANGES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "k8s_secret_resource_changes_total",
            "Total number of resource changes reported by the engine",
        ),
        &["change"],
    )
    .expect("Failed to create RESOURCE_CHANGES_TOTAL metric - this should never happen")
});

fn register(collector: Box<dyn Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Register every metric with [`REGISTRY`]; safe to call more than once
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(Box::new(RUNS_TOTAL.clone()))?;
    register(Box::new(RUN_FAILURES_TOTAL.clone()))?;
    register(Box::new(PHASE_DURATION.clone()))?;
    register(Box::new(PHASE_FAILURES_TOTAL.clone()))?;
    register(Box::new(RESOURCE_CHANGES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_runs(mode: &str) {
    RUNS_TOTAL.with_label_values(&[mode]).inc();
}

pub fn increment_run_failures() {
    RUN_FAILURES_TOTAL.inc();
}

pub fn observe_phase_duration(phase: &str, duration: f64) {
    PHASE_DURATION.with_label_values(&[phase]).observe(duration);
}

pub fn increment_phase_failures(phase: &str) {
    PHASE_FAILURES_TOTAL.with_label_values(&[phase]).inc();
}

/// Add the non-zero counts of `summary` to the resource change counter
pub fn record_resource_changes(summary: &OperationSummary) {
    for (kind, count) in &summary.changes {
        if *count > 0 {
            RESOURCE_CHANGES_TOTAL
                .with_label_values(&[kind.as_str()])
                .inc_by(*count);
        }
    }
}

/// Render the registry in text exposition format
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// Write the registry to `path`, replacing it atomically
pub fn write_textfile(path: &Path) -> Result<()> {
    let text = gather_text()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, text)
        .with_context(|| format!("Failed to write metrics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChangeKind;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_register_metrics_twice() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_increment_runs() {
        let before = RUNS_TOTAL.with_label_values(&["destroy"]).get();
        increment_runs("destroy");
        let after = RUNS_TOTAL.with_label_values(&["destroy"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_run_failures() {
        let before = RUN_FAILURES_TOTAL.get();
        increment_run_failures();
        let after = RUN_FAILURES_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_phase_failures() {
        let before = PHASE_FAILURES_TOTAL.with_label_values(&["refresh"]).get();
        increment_phase_failures("refresh");
        let after = PHASE_FAILURES_TOTAL.with_label_values(&["refresh"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_phase_duration() {
        observe_phase_duration("update", 1.5);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_resource_changes() {
        let before = RESOURCE_CHANGES_TOTAL.with_label_values(&["create"]).get();
        let now = Utc::now();
        record_resource_changes(&OperationSummary {
            changes: BTreeMap::from([(ChangeKind::Create, 3), (ChangeKind::Delete, 0)]),
            started_at: now,
            finished_at: now,
        });
        let after = RESOURCE_CHANGES_TOTAL.with_label_values(&["create"]).get();
        assert_eq!(after, before + 3u64);
    }

    #[test]
    fn test_write_textfile() {
        register_metrics().unwrap();
        increment_runs("apply");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k8s_secret.prom");
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("k8s_secret_runs_total{mode=\"apply\"}"));
        assert!(!dir.path().join("k8s_secret.prom.tmp").exists());
    }
}
