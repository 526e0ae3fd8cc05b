// src/task/mod.rs

//! The task entity and its lifecycle state machine.
//!
//! A [`Task`] is one unit of submitted work. Its state is advanced
//! exclusively by the engine calling the transition methods below in
//! response to backend adapter results; a task never self-transitions.
//!
//! Invariants maintained here:
//! - `handle` is `Some` if and only if the state is one of
//!   `Submitted`, `Running`, `Stopped`, `Terminating`. When a task enters
//!   `Unknown` the handle is moved into [`UnknownInfo`] so it can be
//!   restored by a later conclusive poll.
//! - `unknown` is `Some` if and only if the state is `Unknown`.
//! - `outcome` is `Some` for `Terminating` (pending retrieval) and
//!   `Terminated`; a `Terminated` task has either retrieved its output or
//!   recorded a permanent retrieval failure, never neither.
//! - Every transition appends exactly one [`HistoryEntry`]; re-applying a
//!   poll result that maps to the current state appends nothing.

pub mod history;
pub mod requirements;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{BackendHandle, RemoteOutcome, RemoteStatus};

pub use history::HistoryEntry;
pub use requirements::ResourceRequirements;

/// Session-scoped task identifier, allocated monotonically.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    New,
    Submitted,
    Running,
    Stopped,
    Terminating,
    Terminated,
    Unknown,
}

impl TaskState {
    /// The only terminal state. Success/failure is an attribute of the
    /// terminated task, not a separate state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Terminated)
    }

    /// States in which a task holds a backend handle.
    pub fn holds_handle(self) -> bool {
        matches!(
            self,
            TaskState::Submitted | TaskState::Running | TaskState::Stopped | TaskState::Terminating
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::New => "NEW",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Stopped => "STOPPED",
            TaskState::Terminating => "TERMINATING",
            TaskState::Terminated => "TERMINATED",
            TaskState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a terminated (or terminating) task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    Failure(String),
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure(_))
    }
}

/// Why a task is in the `Unknown` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKind {
    /// A poll could not determine the remote status (adapter reported
    /// unknown, or the poll itself failed transiently).
    PollFailure,
    /// A submission attempt had an ambiguous outcome; the remote job may or
    /// may not exist. The task is held here instead of being re-dispatched,
    /// since blind retry risks duplicate remote execution.
    SubmissionUnverified,
}

/// Bookkeeping for a task in the `Unknown` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownInfo {
    /// Handle the task held before going Unknown, if any. Restored when a
    /// later poll yields a conclusive status.
    #[serde(default)]
    pub stashed_handle: Option<BackendHandle>,
    /// Adapter that owned (or attempted) the submission. Kept so capacity
    /// accounting can still attribute the task to that adapter.
    #[serde(default)]
    pub stashed_adapter: Option<String>,
    /// Consecutive cycles the task has been Unknown.
    pub consecutive: u32,
    pub kind: UnknownKind,
}

/// Immutable description of a task as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub requirements: ResourceRequirements,
    /// Where result artifacts should be materialized once terminated.
    pub output_dir: PathBuf,
}

/// One unit of work tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub requirements: ResourceRequirements,
    pub output_dir: PathBuf,

    state: TaskState,
    #[serde(default)]
    handle: Option<BackendHandle>,
    /// Name of the adapter owning `handle`.
    #[serde(default)]
    adapter: Option<String>,
    #[serde(default)]
    unknown: Option<UnknownInfo>,
    #[serde(default)]
    outcome: Option<TaskOutcome>,
    /// True once `fetch_output` completed for this task.
    #[serde(default)]
    output_retrieved: bool,
    /// False for failures that must not be resubmitted (unverified
    /// submissions, exhausted Unknown polls, aborts).
    #[serde(default = "default_true")]
    retryable: bool,
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

fn default_true() -> bool {
    true
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            command: spec.command,
            requirements: spec.requirements,
            output_dir: spec.output_dir,
            state: TaskState::New,
            handle: None,
            adapter: None,
            unknown: None,
            outcome: None,
            output_retrieved: false,
            retryable: true,
            retries: 0,
            history: Vec::new(),
        }
    }

    // --- read-only accessors -------------------------------------------------

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn handle(&self) -> Option<&BackendHandle> {
        self.handle.as_ref()
    }

    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    pub fn unknown(&self) -> Option<&UnknownInfo> {
        self.unknown.as_ref()
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    pub fn output_retrieved(&self) -> bool {
        self.output_retrieved
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Adapter this task currently occupies a slot on, whether via a live
    /// handle or an Unknown stash.
    pub fn occupied_adapter(&self) -> Option<&str> {
        self.adapter
            .as_deref()
            .or_else(|| self.unknown.as_ref().and_then(|u| u.stashed_adapter.as_deref()))
    }

    /// Whether the handle/state invariant holds. Exposed for tests and
    /// `debug_assert!`s in the engine.
    pub fn handle_invariant_ok(&self) -> bool {
        self.handle.is_some() == self.state.holds_handle()
            && self.unknown.is_some() == (self.state == TaskState::Unknown)
    }

    // --- transitions (engine-driven) ----------------------------------------

    fn transition(&mut self, to: TaskState, reason: impl Into<String>) {
        let from = self.state;
        let reason = reason.into();
        debug!(task = %self.id, name = %self.name, %from, %to, %reason, "task transition");
        self.history.push(HistoryEntry::now(from, to, reason));
        self.state = to;
    }

    /// A dispatch attempt succeeded: NEW -> SUBMITTED with a fresh handle.
    pub fn record_submission(&mut self, adapter: &str, handle: BackendHandle) {
        self.handle = Some(handle);
        self.adapter = Some(adapter.to_string());
        self.transition(
            TaskState::Submitted,
            format!("submitted to adapter '{adapter}'"),
        );
    }

    /// A submission attempt ended with an ambiguous outcome: the remote job
    /// may or may not have been accepted. NEW -> UNKNOWN (verify before
    /// retry); the task will not be re-dispatched.
    pub fn record_submission_unverified(&mut self, adapter: &str, reason: &str) {
        self.unknown = Some(UnknownInfo {
            stashed_handle: None,
            stashed_adapter: Some(adapter.to_string()),
            consecutive: 1,
            kind: UnknownKind::SubmissionUnverified,
        });
        self.transition(
            TaskState::Unknown,
            format!("submission outcome unknown on adapter '{adapter}': {reason}"),
        );
    }

    /// A submission attempt failed outright; the task stays NEW and will be
    /// reconsidered by the dispatcher (transient) or goes to the failure
    /// trajectory (permanent), decided by the caller. Permanent case:
    pub fn record_submission_failure(&mut self, adapter: &str, reason: &str) {
        self.outcome = Some(TaskOutcome::Failure(format!(
            "submission to adapter '{adapter}' failed permanently: {reason}"
        )));
        self.output_retrieved = false;
        self.transition(
            TaskState::Terminated,
            format!("permanent submission failure on adapter '{adapter}': {reason}"),
        );
    }

    /// Apply a successfully obtained remote status. Returns `true` if the
    /// task changed state. Applying the same status twice is a no-op and
    /// appends no history.
    pub fn apply_remote_status(&mut self, status: &RemoteStatus) -> bool {
        match status {
            RemoteStatus::Unknown => {
                self.note_status_unknown("backend reported status unknown");
                true
            }
            conclusive => {
                // A conclusive status resolves any Unknown episode first.
                self.restore_from_unknown();
                match conclusive {
                    RemoteStatus::Queued => self.apply_mapped_state(
                        TaskState::Submitted,
                        "backend reports job queued",
                    ),
                    RemoteStatus::Running => self.apply_mapped_state(
                        TaskState::Running,
                        "backend reports job running",
                    ),
                    RemoteStatus::Stopped => self.apply_mapped_state(
                        TaskState::Stopped,
                        "backend reports job stopped/held",
                    ),
                    RemoteStatus::Done(outcome) => {
                        if self.state == TaskState::Terminating {
                            return false;
                        }
                        self.outcome = Some(match outcome {
                            RemoteOutcome::Success => TaskOutcome::Success,
                            RemoteOutcome::Failure(msg) => TaskOutcome::Failure(msg.clone()),
                        });
                        self.transition(
                            TaskState::Terminating,
                            "backend reports job done; output retrieval pending",
                        );
                        true
                    }
                    RemoteStatus::Unknown => unreachable!("handled above"),
                }
            }
        }
    }

    /// A poll failed transiently: the task status cannot currently be
    /// determined. Enter (or extend) the UNKNOWN state.
    pub fn note_poll_failure(&mut self, reason: &str) {
        self.note_status_unknown(reason);
    }

    /// A poll failed permanently: the backend conclusively cannot track this
    /// job any more. Force the failure trajectory (retry policy applies).
    pub fn record_poll_permanent_failure(&mut self, reason: &str) {
        self.handle = None;
        self.adapter = None;
        self.unknown = None;
        self.outcome = Some(TaskOutcome::Failure(format!(
            "permanent backend error while polling: {reason}"
        )));
        self.output_retrieved = false;
        self.transition(
            TaskState::Terminated,
            format!("permanent backend error: {reason}"),
        );
    }

    /// One more cycle spent in UNKNOWN without learning anything (used for
    /// unverified submissions, which have no handle to poll).
    pub fn tick_unknown(&mut self) {
        if let Some(u) = self.unknown.as_mut() {
            u.consecutive += 1;
        }
    }

    /// Number of consecutive cycles this task has been UNKNOWN (0 if not).
    pub fn consecutive_unknown(&self) -> u32 {
        self.unknown.as_ref().map(|u| u.consecutive).unwrap_or(0)
    }

    /// Force UNKNOWN -> TERMINATED(failure) once the configured bound on
    /// consecutive unknown results is reached. Non-retryable: the remote job
    /// may still exist, so resubmission risks duplicate execution.
    pub fn force_unknown_failure(&mut self, max_unknown_polls: u32) {
        let kind = self.unknown.as_ref().map(|u| u.kind);
        self.unknown = None;
        self.retryable = false;
        let reason = match kind {
            Some(UnknownKind::SubmissionUnverified) => format!(
                "submission outcome could not be verified within {max_unknown_polls} cycles"
            ),
            _ => format!(
                "status unknown for {max_unknown_polls} consecutive polls"
            ),
        };
        self.outcome = Some(TaskOutcome::Failure(reason.clone()));
        self.output_retrieved = false;
        self.transition(TaskState::Terminated, reason);
    }

    /// Output retrieval completed: TERMINATING -> TERMINATED, keeping the
    /// outcome the backend reported.
    pub fn record_fetch_success(&mut self) {
        self.handle = None;
        self.adapter = None;
        self.output_retrieved = true;
        self.transition(TaskState::Terminated, "output retrieved");
    }

    /// Output retrieval failed permanently: TERMINATING -> TERMINATED with a
    /// recorded retrieval failure. A Success outcome is downgraded, since
    /// results were lost.
    pub fn record_fetch_failure(&mut self, reason: &str) {
        self.handle = None;
        self.adapter = None;
        self.output_retrieved = false;
        if !matches!(self.outcome, Some(TaskOutcome::Failure(_))) {
            self.outcome = Some(TaskOutcome::Failure(format!(
                "output retrieval failed permanently: {reason}"
            )));
        }
        self.transition(
            TaskState::Terminated,
            format!("permanent output retrieval failure: {reason}"),
        );
    }

    /// Retry policy reset: TERMINATED(failure) -> NEW with the counter
    /// incremented. The caller checks the bound and `retryable`.
    pub fn reset_for_retry(&mut self, max_retries: u32) {
        self.handle = None;
        self.adapter = None;
        self.unknown = None;
        self.outcome = None;
        self.output_retrieved = false;
        self.retries += 1;
        let reason = format!("resubmission {} of {}", self.retries, max_retries);
        self.transition(TaskState::New, reason);
    }

    /// Abort: force any non-terminal task to TERMINATED(failure), not
    /// retryable. The engine performs the best-effort backend cancel before
    /// calling this.
    pub fn force_abort(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.handle = None;
        self.adapter = None;
        self.unknown = None;
        self.retryable = false;
        self.outcome = Some(TaskOutcome::Failure("aborted".to_string()));
        self.output_retrieved = false;
        self.transition(TaskState::Terminated, "session aborted");
    }

    // --- internal helpers ----------------------------------------------------

    fn apply_mapped_state(&mut self, to: TaskState, reason: &str) -> bool {
        if self.state == to {
            return false;
        }
        self.transition(to, reason);
        true
    }

    fn note_status_unknown(&mut self, reason: &str) {
        match self.unknown.as_mut() {
            Some(u) => {
                u.consecutive += 1;
                debug!(
                    task = %self.id,
                    consecutive = u.consecutive,
                    "task still UNKNOWN"
                );
            }
            None => {
                self.unknown = Some(UnknownInfo {
                    stashed_handle: self.handle.take(),
                    stashed_adapter: self.adapter.take(),
                    consecutive: 1,
                    kind: UnknownKind::PollFailure,
                });
                self.transition(TaskState::Unknown, reason);
            }
        }
    }

    fn restore_from_unknown(&mut self) {
        if let Some(u) = self.unknown.take() {
            self.handle = u.stashed_handle;
            self.adapter = u.stashed_adapter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHandle, RemoteOutcome, RemoteStatus};

    fn spec(name: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            command: vec!["true".to_string()],
            requirements: ResourceRequirements::default(),
            output_dir: PathBuf::from("/tmp/out"),
        }
    }

    fn submitted_task() -> Task {
        let mut t = Task::new(TaskId(1), spec("t1"));
        t.record_submission("local", BackendHandle::new("h-1"));
        t
    }

    #[test]
    fn new_task_has_no_handle() {
        let t = Task::new(TaskId(1), spec("t1"));
        assert_eq!(t.state(), TaskState::New);
        assert!(t.handle().is_none());
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn submission_assigns_handle_and_logs_history() {
        let t = submitted_task();
        assert_eq!(t.state(), TaskState::Submitted);
        assert!(t.handle().is_some());
        assert_eq!(t.history().len(), 1);
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn poll_is_idempotent_on_unchanged_status() {
        let mut t = submitted_task();
        assert!(t.apply_remote_status(&RemoteStatus::Running));
        let entries = t.history().len();
        assert!(!t.apply_remote_status(&RemoteStatus::Running));
        assert_eq!(t.history().len(), entries);
        assert_eq!(t.state(), TaskState::Running);
    }

    #[test]
    fn stopped_can_resume_to_running() {
        let mut t = submitted_task();
        t.apply_remote_status(&RemoteStatus::Stopped);
        assert_eq!(t.state(), TaskState::Stopped);
        t.apply_remote_status(&RemoteStatus::Running);
        assert_eq!(t.state(), TaskState::Running);
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn done_enters_terminating_with_outcome() {
        let mut t = submitted_task();
        t.apply_remote_status(&RemoteStatus::Done(RemoteOutcome::Success));
        assert_eq!(t.state(), TaskState::Terminating);
        assert_eq!(t.outcome(), Some(&TaskOutcome::Success));
        // Handle is still needed for output retrieval.
        assert!(t.handle().is_some());
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn unknown_stashes_handle_and_restores_on_conclusive_poll() {
        let mut t = submitted_task();
        t.note_poll_failure("adapter unreachable");
        assert_eq!(t.state(), TaskState::Unknown);
        assert!(t.handle().is_none());
        assert!(t.handle_invariant_ok());
        assert_eq!(t.consecutive_unknown(), 1);

        t.note_poll_failure("adapter unreachable");
        assert_eq!(t.consecutive_unknown(), 2);

        t.apply_remote_status(&RemoteStatus::Running);
        assert_eq!(t.state(), TaskState::Running);
        assert!(t.handle().is_some());
        assert_eq!(t.consecutive_unknown(), 0);
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn exhausted_unknown_is_terminal_and_not_retryable() {
        let mut t = submitted_task();
        for _ in 0..3 {
            t.note_poll_failure("adapter unreachable");
        }
        assert_eq!(t.consecutive_unknown(), 3);
        t.force_unknown_failure(3);
        assert_eq!(t.state(), TaskState::Terminated);
        assert!(!t.retryable());
        assert!(matches!(t.outcome(), Some(TaskOutcome::Failure(_))));
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn unverified_submission_is_held_not_redispatched() {
        let mut t = Task::new(TaskId(2), spec("t2"));
        t.record_submission_unverified("local", "timeout during submit");
        assert_eq!(t.state(), TaskState::Unknown);
        assert_eq!(
            t.unknown().map(|u| u.kind),
            Some(UnknownKind::SubmissionUnverified)
        );
        assert!(t.handle().is_none());
        // Occupies the adapter slot conservatively.
        assert_eq!(t.occupied_adapter(), Some("local"));
    }

    #[test]
    fn fetch_failure_downgrades_success_outcome() {
        let mut t = submitted_task();
        t.apply_remote_status(&RemoteStatus::Done(RemoteOutcome::Success));
        t.record_fetch_failure("destination unwritable");
        assert_eq!(t.state(), TaskState::Terminated);
        assert!(!t.output_retrieved());
        assert!(matches!(t.outcome(), Some(TaskOutcome::Failure(_))));
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn retry_reset_clears_backend_bookkeeping() {
        let mut t = submitted_task();
        t.apply_remote_status(&RemoteStatus::Done(RemoteOutcome::Failure(
            "exit code 1".to_string(),
        )));
        t.record_fetch_success();
        assert_eq!(t.state(), TaskState::Terminated);

        t.reset_for_retry(3);
        assert_eq!(t.state(), TaskState::New);
        assert!(t.handle().is_none());
        assert!(t.outcome().is_none());
        assert_eq!(t.retries(), 1);
        assert!(t.handle_invariant_ok());
    }

    #[test]
    fn history_is_append_only_across_lifecycle() {
        let mut t = submitted_task();
        let mut seen = t.history().to_vec();
        t.apply_remote_status(&RemoteStatus::Running);
        assert_eq!(&t.history()[..seen.len()], &seen[..]);
        seen = t.history().to_vec();
        t.apply_remote_status(&RemoteStatus::Done(RemoteOutcome::Success));
        assert_eq!(&t.history()[..seen.len()], &seen[..]);
    }
}
