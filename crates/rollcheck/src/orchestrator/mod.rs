//! Check Orchestrator
//!
//! Runs an ordered list of labelled evaluators against one target. Every
//! check runs, in declared order, whatever the outcome of the previous ones.

pub mod state;

pub use state::RunState;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::evaluators::{Evaluator, ProbeContext};
use crate::metrics;
use crate::result::{CheckResult, RunTarget, VerificationRun};

/// A labelled evaluator with an optional settle delay
pub struct Check {
    pub label: String,
    /// Waited before evaluating; zero means none
    pub settle: Duration,
    pub evaluator: Box<dyn Evaluator>,
}

impl Check {
    pub fn new(label: impl Into<String>, evaluator: impl Evaluator + 'static) -> Self {
        Self {
            label: label.into(),
            settle: Duration::ZERO,
            evaluator: Box::new(evaluator),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check")
            .field("label", &self.label)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

/// Notified as each check starts and finishes
pub trait RunObserver: Send {
    fn check_started(&mut self, index: usize, label: &str);
    fn check_finished(&mut self, result: &CheckResult);
}

/// Observer that ignores every event
#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn check_started(&mut self, _index: usize, _label: &str) {}
    fn check_finished(&mut self, _result: &CheckResult) {}
}

pub struct Orchestrator<'a> {
    ctx: ProbeContext<'a>,
    settle_override: Option<Duration>,
    state: RunState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: ProbeContext<'a>) -> Self {
        Self {
            ctx,
            settle_override: None,
            state: RunState::NotStarted,
        }
    }

    /// Replace every declared settle delay; `Some(Duration::ZERO)` disables them.
    pub fn with_settle_override(mut self, settle_override: Option<Duration>) -> Self {
        self.settle_override = settle_override;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(self.state.can_advance_to(next), "{} -> {}", self.state, next);
        debug!("Run state {} -> {}", self.state, next);
        self.state = next;
    }

    fn settle_for(&self, check: &Check) -> Duration {
        if check.settle.is_zero() {
            return Duration::ZERO;
        }
        self.settle_override.unwrap_or(check.settle)
    }

    /// Evaluate every check in order and aggregate the outcome.
    pub async fn run(
        &mut self,
        target: RunTarget,
        checks: &[Check],
        observer: &mut dyn RunObserver,
    ) -> VerificationRun {
        info!(
            "Verifying {} in namespace {} with profile {} ({} checks)",
            target.target,
            target.namespace,
            target.profile,
            checks.len()
        );
        let mut run = VerificationRun::new(target);

        for (index, check) in checks.iter().enumerate() {
            self.advance(RunState::Running(index));
            observer.check_started(index, &check.label);

            let settle = self.settle_for(check);
            if !settle.is_zero() {
                debug!("Waiting {:?} before '{}'", settle, check.label);
                tokio::time::sleep(settle).await;
            }

            let started = Instant::now();
            let verdict = check.evaluator.evaluate(&self.ctx).await;
            let elapsed = started.elapsed();

            if verdict.passed {
                debug!("Check '{}' passed: {}", check.label, verdict.message);
            } else {
                warn!("Check '{}' failed: {}", check.label, verdict.message);
            }
            metrics::record_check(verdict.passed, elapsed);

            let result = CheckResult::new(check.label.clone(), verdict.passed, verdict.message)
                .with_details(verdict.details)
                .with_duration(elapsed);
            observer.check_finished(&result);
            run.record(result);
        }

        run.finish();
        self.advance(RunState::Completed);
        metrics::record_run(&run);
        info!(
            "Verification of {} finished: {}/{} checks passed",
            run.target,
            run.results.len() - run.failed_count(),
            run.results.len()
        );
        run
    }
}
