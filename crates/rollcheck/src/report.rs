//! Human-readable and JSON reporting of verification runs.

use std::io::Write;
use std::process::ExitCode;
use std::str::FromStr;

use crate::orchestrator::RunObserver;
use crate::result::{CheckResult, VerificationRun};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::Config(format!(
                "invalid output format '{}', must be 'text' or 'json'",
                other
            ))),
        }
    }
}

/// Streams one block per check as the run progresses.
pub struct TextReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> TextReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Banner printed before the first check.
    pub fn intro(&mut self, target: &str, namespace: &str, profile: &str) {
        let _ = writeln!(
            self.out,
            "Verifying {} in namespace {} (profile: {})",
            target, namespace, profile
        );
    }

    pub fn summary(&mut self, run: &VerificationRun) {
        let total = run.results.len();
        let line = if run.overall_passed {
            format!(
                "✓ {} verification successful! All {} checks passed.",
                run.target, total
            )
        } else {
            format!(
                "✗ {} verification failed! {}/{} checks failed.",
                run.target,
                run.failed_count(),
                total
            )
        };
        let _ = writeln!(self.out, "\n{}", line);
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> RunObserver for TextReporter<W> {
    fn check_started(&mut self, _index: usize, label: &str) {
        let _ = writeln!(self.out, "\n{}...", label);
        let _ = self.out.flush();
    }

    fn check_finished(&mut self, result: &CheckResult) {
        let mark = if result.passed { "✓" } else { "✗" };
        let _ = writeln!(self.out, "{} {}", mark, result.message);
        for detail in &result.details {
            let _ = writeln!(self.out, "  {}", detail);
        }
        let _ = self.out.flush();
    }
}

/// Serializes the whole run once it is complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter {
    pub pretty: bool,
}

impl JsonReporter {
    pub fn render(&self, run: &VerificationRun) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(run)?
        } else {
            serde_json::to_string(run)?
        };
        Ok(text)
    }

    pub fn write(&self, run: &VerificationRun, out: &mut impl Write) -> Result<()> {
        writeln!(out, "{}", self.render(run)?)?;
        Ok(())
    }
}

/// 0 when every check passed, 1 otherwise
pub fn exit_status(run: &VerificationRun) -> u8 {
    if run.overall_passed {
        0
    } else {
        1
    }
}

pub fn exit_code(run: &VerificationRun) -> ExitCode {
    ExitCode::from(exit_status(run))
}
