//! Prometheus metrics for verification runs, exported as a textfile.

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::path::Path;
use std::time::Duration;

use crate::result::VerificationRun;
use crate::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("rollcheck_checks_total", "Total number of evaluated checks."),
        &["outcome"]
    )
    .unwrap();
    pub static ref CHECK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("rollcheck_check_duration_seconds", "Time spent evaluating one check.")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .unwrap();
    pub static ref RUN_PASSED: IntGaugeVec = IntGaugeVec::new(
        Opts::new("rollcheck_run_passed", "1 if the last run for a target passed, 0 otherwise."),
        &["target", "profile"]
    )
    .unwrap();
}

/// Register every collector with [`REGISTRY`]. Safe to call more than once.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CHECKS_TOTAL.clone()),
        Box::new(CHECK_DURATION_SECONDS.clone()),
        Box::new(RUN_PASSED.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeat calls
        let _ = REGISTRY.register(collector);
    }
}

pub fn record_check(passed: bool, duration: Duration) {
    let outcome = if passed { "passed" } else { "failed" };
    CHECKS_TOTAL.with_label_values(&[outcome]).inc();
    CHECK_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_run(run: &VerificationRun) {
    RUN_PASSED
        .with_label_values(&[run.target.as_str(), run.profile.as_str()])
        .set(i64::from(run.overall_passed));
}

/// Encode the registry in the Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    register_metrics();
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Config(format!("metrics are not valid UTF-8: {}", e)))
}

/// Write the current metrics to `path`, for the node-exporter textfile collector.
pub fn write_metrics_file(path: &Path) -> Result<()> {
    let text = gather_metrics()?;
    std::fs::write(path, text)?;
    Ok(())
}
