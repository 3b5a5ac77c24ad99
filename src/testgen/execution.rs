//! Test-run bridge.
//!
//! Hosts push per-test and run-level events to a callback sink; the runner
//! waits for the first run-level event and reduces it to a verdict.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::HostError;
use crate::testgen::request::RequestKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Unit,
    Integration,
}

impl TestMode {
    pub fn label(self) -> &'static str {
        match self {
            TestMode::Unit => "unit",
            TestMode::Integration => "integration",
        }
    }

    /// Integration scenarios always run in integration mode; everything else
    /// uses the configured default.
    pub fn for_request(kind: RequestKind, default: TestMode) -> Self {
        match kind {
            RequestKind::Integration => TestMode::Integration,
            _ => default,
        }
    }
}

/// Selects exactly the tests to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFilter {
    pub mode: TestMode,
    pub module_names: Vec<String>,
    pub test_names: Vec<String>,
}

impl TestFilter {
    pub fn single(mode: TestMode, module: &str, test: &str) -> Self {
        Self {
            mode,
            module_names: vec![module.to_string()],
            test_names: vec![test.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail,
    Skip,
    Inconclusive,
}

#[derive(Debug, Clone)]
pub struct TestCaseResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub note: Option<String>,
}

/// Run-level counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pass_count: usize,
    pub fail_count: usize,
    pub skip_count: usize,
    pub inconclusive_count: usize,
}

impl RunSummary {
    /// At least one test ran and nothing failed or was inconclusive.
    pub fn passed(&self) -> bool {
        self.pass_count > 0 && self.fail_count == 0 && self.inconclusive_count == 0
    }
}

pub trait TestCallbacks: Send + Sync {
    fn run_started(&self, _filter: &TestFilter) {}
    fn test_finished(&self, _result: &TestCaseResult) {}
    fn run_finished(&self, summary: &RunSummary);
}

pub trait TestHost: Send + Sync {
    /// Start a run; results arrive on `callbacks`, possibly from another
    /// thread. A host that drops `callbacks` without a run-level event is
    /// treated as an indeterminate run.
    fn execute(&self, filter: TestFilter, callbacks: Arc<dyn TestCallbacks>) -> Result<(), HostError>;
}

/// Resolves at most once, on the first run-level event.
struct VerdictSink {
    tx: Sender<bool>,
    resolved: AtomicBool,
}

impl TestCallbacks for VerdictSink {
    fn test_finished(&self, result: &TestCaseResult) {
        tracing::debug!(test = %result.name, outcome = ?result.outcome, "test finished");
    }

    fn run_finished(&self, summary: &RunSummary) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            passed = summary.pass_count,
            failed = summary.fail_count,
            inconclusive = summary.inconclusive_count,
            "test run finished"
        );
        let _ = self.tx.try_send(summary.passed());
    }
}

pub struct ExecutionRunner {
    host: Arc<dyn TestHost>,
    timeout: Option<Duration>,
}

impl ExecutionRunner {
    pub fn new(host: Arc<dyn TestHost>, timeout: Option<Duration>) -> Self {
        Self { host, timeout }
    }

    pub fn from_config(host: Arc<dyn TestHost>, cfg: &Config) -> Self {
        Self::new(host, cfg.test_timeout())
    }

    /// Run one test in one module. Every failure mode is a `false` verdict.
    pub fn run(&self, mode: TestMode, module_name: &str, test_identifier: &str) -> bool {
        let filter = TestFilter::single(mode, module_name, test_identifier);
        let (tx, rx) = bounded(1);
        let sink = Arc::new(VerdictSink {
            tx,
            resolved: AtomicBool::new(false),
        });

        if let Err(e) = self.host.execute(filter, sink) {
            tracing::error!(module = module_name, test = test_identifier, "test submission failed: {e}");
            return false;
        }

        let verdict = match self.timeout {
            Some(t) => rx.recv_timeout(t).map_err(|e| e.to_string()),
            None => rx.recv().map_err(|e| e.to_string()),
        };

        match verdict {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(module = module_name, test = test_identifier, "no run result: {e}");
                false
            }
        }
    }
}
