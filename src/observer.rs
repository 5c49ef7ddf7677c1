//! Reporting hooks the pipeline stages call while they run.

use crate::run_logger::{Component, LogLevel};
use crate::usage_tracker::UsageStats;

/// Receives log lines, status text, progress and usage snapshots from a
/// stage. Every hook is optional.
pub trait Observer {
    /// Called when a stage starts; later events belong to it.
    fn stage_started(&self, _component: Component) {}

    fn log(&self, _level: LogLevel, _message: &str) {}

    fn status(&self, _message: &str) {}

    /// Percentage in `0.0..=100.0`.
    fn progress(&self, _percent: f64) {}

    fn usage(&self, _stats: &UsageStats) {}

    /// Polled at the same points as the cancellation token.
    fn should_stop(&self) -> bool {
        false
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped on request; work done so far is kept
    Stopped,
    Failed(String),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    #[cfg(test)]
    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Stopped => f.write_str("stopped"),
            RunOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}
