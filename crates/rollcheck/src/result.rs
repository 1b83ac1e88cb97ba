//! Verification Result Structures
//!
//! Defines the output of one verification run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a single check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Declared label of the check (e.g. "Pods running")
    pub name: String,

    pub passed: bool,

    /// Human-readable detail: counts, error text
    pub message: String,

    /// Extra diagnostic lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,

    /// Time spent evaluating, settle delay excluded
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
            details: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// What a run verifies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub target: String,
    pub namespace: String,
    pub profile: String,
}

impl RunTarget {
    pub fn new(target: impl Into<String>, namespace: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            namespace: namespace.into(),
            profile: profile.into(),
        }
    }
}

/// Aggregate of one verification invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRun {
    pub run_id: Uuid,
    pub target: String,
    pub namespace: String,
    pub profile: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// In declared check order
    pub results: Vec<CheckResult>,

    pub overall_passed: bool,
}

impl VerificationRun {
    pub fn new(target: RunTarget) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target: target.target,
            namespace: target.namespace,
            profile: target.profile,
            started_at: Utc::now(),
            finished_at: None,
            results: Vec::new(),
            overall_passed: true,
        }
    }

    pub fn record(&mut self, result: CheckResult) {
        self.overall_passed &= result.passed;
        self.results.push(result);
    }

    pub fn finish(&mut self) {
        self.overall_passed = self.results.iter().all(|r| r.passed);
        self.finished_at = Some(Utc::now());
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> VerificationRun {
        VerificationRun::new(RunTarget::new("web", "default", "app"))
    }

    #[test]
    fn test_one_failure_fails_the_run_wherever_it_sits() {
        for failing in 0..3 {
            let mut run = run();
            for i in 0..3 {
                run.record(CheckResult::new(format!("check {}", i), i != failing, ""));
            }
            run.finish();
            assert!(!run.overall_passed);
            assert_eq!(run.failed_count(), 1);
        }
    }

    #[test]
    fn test_all_passing_passes() {
        let mut run = run();
        run.record(CheckResult::new("a", true, "ok"));
        run.record(CheckResult::new("b", true, "ok"));
        run.finish();
        assert!(run.overall_passed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_details_are_omitted_from_json_when_empty() {
        let value = serde_json::to_value(CheckResult::new("a", true, "ok")).unwrap();
        assert!(value.get("details").is_none());
        assert_eq!(value["passed"], true);
    }
}
