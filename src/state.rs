use std::fmt;
use std::time::Instant;

/* ---------- lifecycle ---------- */

/// Orchestrator lifecycle.
///
/// `Finished` is a drain state reached on success and on failure alike;
/// whether the test passed is tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratingStep {
    Idle,
    GettingIntention,
    GeneratingCode,
    CorrectingCode,
    RunningTests,
    UpdatingDatabase,
    Finished,
}

impl GeneratingStep {
    /// Position in the pipeline, for progress bars.
    pub fn ordinal(self) -> usize {
        match self {
            GeneratingStep::Idle => 0,
            GeneratingStep::GettingIntention => 1,
            GeneratingStep::GeneratingCode => 2,
            GeneratingStep::CorrectingCode => 3,
            GeneratingStep::RunningTests => 4,
            GeneratingStep::UpdatingDatabase => 5,
            GeneratingStep::Finished => 6,
        }
    }
}

impl fmt::Display for GeneratingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GeneratingStep::Idle => "idle",
            GeneratingStep::GettingIntention => "getting intention",
            GeneratingStep::GeneratingCode => "generating code",
            GeneratingStep::CorrectingCode => "correcting code",
            GeneratingStep::RunningTests => "running tests",
            GeneratingStep::UpdatingDatabase => "updating database",
            GeneratingStep::Finished => "finished",
        };
        f.write_str(s)
    }
}

/* ---------- progress ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub step: GeneratingStep,
    pub level: LogLevel,
    pub message: String,
    pub at: Instant,
}

impl ProgressEvent {
    pub fn new(step: GeneratingStep, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            step,
            level,
            message: message.into(),
            at: Instant::now(),
        }
    }
}
