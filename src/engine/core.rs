// src/engine/core.rs

//! Pure application of adapter results to tasks.
//!
//! These functions contain all engine semantics that do not involve IO:
//! given a task and the outcome of one adapter operation, they decide the
//! transition. The async shell ([`super::runtime`]) gathers operation
//! results concurrently, then applies them here sequentially in TaskId
//! order so a cycle is deterministic and testable without Tokio.
//!
//! Every function returns whether the task mutated, which the shell
//! aggregates to decide if the session must be persisted this cycle.

use tracing::{debug, warn};

use crate::backend::{BackendError, BackendHandle, BackendResult, RemoteStatus};
use crate::task::{Task, TaskState};

/// Apply the result of a `poll` operation.
pub fn apply_poll_result(task: &mut Task, result: BackendResult<RemoteStatus>) -> bool {
    match result {
        Ok(status) => task.apply_remote_status(&status),
        Err(BackendError::Transient(msg)) => {
            warn!(task = %task.id, error = %msg, "transient poll failure");
            task.note_poll_failure(&msg);
            true
        }
        Err(BackendError::UnknownOutcome(msg)) => {
            // Poll implementations shouldn't produce this; treat it like a
            // transient failure rather than guessing.
            warn!(task = %task.id, error = %msg, "unexpected UnknownOutcome from poll");
            task.note_poll_failure(&msg);
            true
        }
        Err(BackendError::Permanent(msg)) => {
            warn!(task = %task.id, error = %msg, "permanent poll failure");
            task.record_poll_permanent_failure(&msg);
            true
        }
    }
}

/// Apply the result of a `fetch_output` operation.
///
/// Transient failures leave the task in TERMINATING for the next cycle.
pub fn apply_fetch_result(task: &mut Task, result: BackendResult<()>) -> bool {
    match result {
        Ok(()) => {
            task.record_fetch_success();
            true
        }
        Err(BackendError::Transient(msg)) | Err(BackendError::UnknownOutcome(msg)) => {
            debug!(task = %task.id, error = %msg, "transient fetch failure; retrying next cycle");
            false
        }
        Err(BackendError::Permanent(msg)) => {
            warn!(task = %task.id, error = %msg, "permanent fetch failure");
            task.record_fetch_failure(&msg);
            true
        }
    }
}

/// Apply the result of a `submit` operation.
///
/// Transient failures leave the task NEW (the dispatcher reconsiders it
/// next cycle); an ambiguous outcome parks it in the verify-before-retry
/// UNKNOWN sub-state.
pub fn apply_submit_result(
    task: &mut Task,
    adapter: &str,
    result: BackendResult<BackendHandle>,
) -> bool {
    match result {
        Ok(handle) => {
            task.record_submission(adapter, handle);
            true
        }
        Err(BackendError::Transient(msg)) => {
            debug!(task = %task.id, adapter = %adapter, error = %msg,
                "transient submit failure; task stays NEW");
            false
        }
        Err(BackendError::UnknownOutcome(msg)) => {
            warn!(task = %task.id, adapter = %adapter, error = %msg,
                "ambiguous submission outcome; holding task for verification");
            task.record_submission_unverified(adapter, &msg);
            true
        }
        Err(BackendError::Permanent(msg)) => {
            warn!(task = %task.id, adapter = %adapter, error = %msg, "permanent submit failure");
            task.record_submission_failure(adapter, &msg);
            true
        }
    }
}

/// Force tasks that exhausted the UNKNOWN bound onto the failure
/// trajectory.
pub fn enforce_unknown_bound(task: &mut Task, max_unknown_polls: u32) -> bool {
    if task.state() == TaskState::Unknown && task.consecutive_unknown() >= max_unknown_polls {
        task.force_unknown_failure(max_unknown_polls);
        return true;
    }
    false
}

/// Retry policy: reset a failed task to NEW while attempts remain.
///
/// Non-retryable failures (unverified submissions, exhausted UNKNOWN,
/// aborts) and tasks at the bound stay TERMINATED(failure) permanently.
pub fn apply_retry_policy(task: &mut Task, max_retries: u32) -> bool {
    if task.state() != TaskState::Terminated {
        return false;
    }
    let failed = task.outcome().map(|o| o.is_failure()).unwrap_or(false);
    if !failed || !task.retryable() || task.retries() >= max_retries {
        return false;
    }
    task.reset_for_retry(max_retries);
    true
}
