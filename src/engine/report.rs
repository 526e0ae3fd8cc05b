// src/engine/report.rs

//! Cycle and campaign progress summaries.

use std::collections::BTreeMap;

use crate::session::Session;
use crate::task::{TaskOutcome, TaskState};

/// What one `progress()` cycle did. Returned to the caller and logged at
/// the end of every cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tasks whose backend status was polled.
    pub polled: usize,
    /// Tasks submitted to an adapter this cycle.
    pub submitted: usize,
    /// Tasks whose output retrieval completed.
    pub fetched: usize,
    /// Failed tasks reset to NEW by the retry policy.
    pub retried: usize,
    /// Tasks that reached TERMINATED with a failure outcome this cycle.
    pub failed: usize,
    /// Whether any task mutated (the session was persisted iff true).
    pub changed: bool,
}

/// Point-in-time summary of a whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub total: usize,
    pub per_state: BTreeMap<TaskState, usize>,
    pub succeeded: usize,
    pub failed: usize,
}

impl ProgressReport {
    pub fn from_session(session: &Session) -> Self {
        let mut per_state: BTreeMap<TaskState, usize> = BTreeMap::new();
        let mut succeeded = 0;
        let mut failed = 0;
        for task in session.tasks() {
            *per_state.entry(task.state()).or_insert(0) += 1;
            if task.state() == TaskState::Terminated {
                match task.outcome() {
                    Some(TaskOutcome::Success) => succeeded += 1,
                    _ => failed += 1,
                }
            }
        }
        Self {
            total: session.len(),
            per_state,
            succeeded,
            failed,
        }
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.per_state.get(&state).copied().unwrap_or(0)
    }

    /// Fraction of tasks that reached TERMINATED, in percent.
    pub fn percent_terminated(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.count(TaskState::Terminated) as f64 * 100.0 / self.total as f64
    }

    pub fn all_terminal(&self) -> bool {
        self.count(TaskState::Terminated) == self.total
    }
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>12}  {}", "total", self.total)?;
        for state in [
            TaskState::New,
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Stopped,
            TaskState::Unknown,
            TaskState::Terminating,
            TaskState::Terminated,
        ] {
            let n = self.count(state);
            if n > 0 {
                writeln!(f, "{:>12}  {}", state.as_str(), n)?;
            }
        }
        writeln!(f, "{:>12}  {}", "ok", self.succeeded)?;
        writeln!(f, "{:>12}  {}", "failed", self.failed)?;
        write!(f, "{:>12}  {:.1}%", "done", self.percent_terminated())
    }
}
