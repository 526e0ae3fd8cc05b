// src/engine/runtime.rs

//! The async engine shell.
//!
//! One [`Engine::progress`] call runs one cycle over the session:
//!
//! 1. poll every task holding a handle (including stashed UNKNOWN handles)
//! 2. retrieve output for TERMINATING tasks
//! 3. apply the retry policy to failed tasks
//! 4. dispatch and submit NEW tasks
//! 5. persist the session iff anything changed
//!
//! Within a phase adapter operations run concurrently on a `JoinSet`;
//! their results are applied to the session sequentially in `TaskId`
//! order (via [`super::core`]) so a cycle is deterministic. Every adapter
//! operation is wrapped in the configured timeout: an expired poll,
//! fetch or cancel counts as a transient failure, while an expired
//! submit is an unknown outcome since the job may have been accepted.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendHandle, BackendResult, RemoteStatus, SubmitRequest};
use crate::dispatch::Dispatcher;
use crate::errors::Result;
use crate::session::{Session, SessionLock, SessionStore};
use crate::task::{Task, TaskId, TaskOutcome, TaskState, UnknownKind};

use super::core;
use super::report::{CycleReport, ProgressReport};
use super::EngineOptions;

/// Drives one session to completion against a set of adapters.
///
/// Holds the session lock for its whole lifetime; the lock file is
/// removed when the engine is dropped.
pub struct Engine {
    session: Session,
    store: SessionStore,
    _lock: SessionLock,
    dispatcher: Dispatcher,
    options: EngineOptions,
}

/// The handle a task currently occupies on an adapter, whether held
/// directly or stashed during an UNKNOWN episode.
fn occupied_handle(task: &Task) -> Option<(&str, &BackendHandle)> {
    if let (Some(adapter), Some(handle)) = (task.adapter(), task.handle()) {
        return Some((adapter, handle));
    }
    let u = task.unknown()?;
    Some((u.stashed_adapter.as_deref()?, u.stashed_handle.as_ref()?))
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    on_timeout: fn(String) -> BackendError,
    fut: impl Future<Output = BackendResult<T>>,
) -> BackendResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!(
            "{what} did not complete within {}s",
            limit.as_secs()
        ))),
    }
}

impl Engine {
    pub fn new(
        session: Session,
        store: SessionStore,
        lock: SessionLock,
        dispatcher: Dispatcher,
        options: EngineOptions,
    ) -> Self {
        Self {
            session,
            store,
            _lock: lock,
            dispatcher,
            options,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport::from_session(&self.session)
    }

    /// Run one cycle. Persists the session before returning iff any task
    /// changed.
    pub async fn progress(&mut self) -> Result<CycleReport> {
        if self.session.is_closed() {
            return Err(crate::errors::TaskfarmError::SessionClosed(
                self.session.name().to_string(),
            ));
        }

        let mut report = CycleReport::default();
        let terminated_before: BTreeSet<TaskId> = self
            .session
            .tasks()
            .filter(|t| t.is_terminal())
            .map(|t| t.id)
            .collect();

        report.changed |= self.poll_phase(&mut report).await?;
        report.changed |= self.fetch_phase(&mut report).await?;

        report.failed = self
            .session
            .tasks()
            .filter(|t| {
                t.is_terminal()
                    && matches!(t.outcome(), Some(TaskOutcome::Failure(_)))
                    && !terminated_before.contains(&t.id)
            })
            .count();

        report.changed |= self.retry_phase(&mut report);
        report.changed |= self.submit_phase(&mut report).await?;

        if report.changed {
            self.store.save(&self.session)?;
        }
        debug!(
            polled = report.polled,
            submitted = report.submitted,
            fetched = report.fetched,
            retried = report.retried,
            failed = report.failed,
            changed = report.changed,
            "cycle complete"
        );
        Ok(report)
    }

    /// Run cycles until every task is TERMINATED, sleeping the configured
    /// poll interval after cycles that made no progress.
    pub async fn run_to_completion(&mut self) -> Result<ProgressReport> {
        while !self.session.all_terminal() {
            let report = self.progress().await?;
            if self.session.all_terminal() {
                break;
            }
            if !report.changed {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }
        let report = self.report();
        info!(
            ok = report.succeeded,
            failed = report.failed,
            total = report.total,
            "campaign complete"
        );
        Ok(report)
    }

    /// Abort the campaign: best-effort cancel of every occupied handle,
    /// then force all non-terminal tasks to TERMINATED(failure) and close
    /// the session. Always persists, even if cancels fail.
    pub async fn abort(&mut self) -> Result<ProgressReport> {
        let mut cancels: JoinSet<(TaskId, BackendResult<()>)> = JoinSet::new();
        for task in self.session.tasks() {
            let Some((adapter_name, handle)) = occupied_handle(task) else {
                continue;
            };
            let Some(adapter) = self.dispatcher.adapter(adapter_name) else {
                warn!(task = %task.id, adapter = %adapter_name,
                    "adapter no longer configured; skipping cancel");
                continue;
            };
            let adapter = adapter.clone();
            let handle = handle.clone();
            let id = task.id;
            let limit = self.options.op_timeout;
            cancels.spawn(async move {
                let result = with_timeout(limit, "cancel", BackendError::Transient, async {
                    adapter.cancel(handle).await
                })
                .await;
                (id, result)
            });
        }
        while let Some(joined) = cancels.join_next().await {
            let (id, result) = joined.map_err(anyhow::Error::from)?;
            if let Err(err) = result {
                warn!(task = %id, error = %err, "cancel failed during abort");
            }
        }

        for task in self.session.tasks_mut() {
            task.force_abort();
        }
        self.session.close();
        self.store.save(&self.session)?;
        info!(session = %self.session.name(), "session aborted");
        Ok(self.report())
    }

    // --- cycle phases --------------------------------------------------------

    /// Poll every task with an occupied handle and apply the results in
    /// TaskId order. Unverified submissions have nothing to poll; their
    /// UNKNOWN counter ticks instead. Finally the bound on consecutive
    /// UNKNOWN results is enforced.
    async fn poll_phase(&mut self, report: &mut CycleReport) -> Result<bool> {
        let mut polls: JoinSet<(TaskId, BackendResult<RemoteStatus>)> = JoinSet::new();
        let mut immediate: Vec<(TaskId, BackendResult<RemoteStatus>)> = Vec::new();

        for task in self.session.tasks() {
            if task.state() == TaskState::Terminating {
                continue;
            }
            let Some((adapter_name, handle)) = occupied_handle(task) else {
                continue;
            };
            let Some(adapter) = self.dispatcher.adapter(adapter_name) else {
                immediate.push((
                    task.id,
                    Err(BackendError::Permanent(format!(
                        "adapter '{adapter_name}' is no longer configured"
                    ))),
                ));
                continue;
            };
            let adapter = adapter.clone();
            let handle = handle.clone();
            let id = task.id;
            let limit = self.options.op_timeout;
            polls.spawn(async move {
                let result = with_timeout(limit, "poll", BackendError::Transient, async {
                    adapter.poll(handle).await
                })
                .await;
                (id, result)
            });
        }

        let mut results = immediate;
        while let Some(joined) = polls.join_next().await {
            results.push(joined.map_err(anyhow::Error::from)?);
        }
        results.sort_by_key(|(id, _)| *id);

        let mut changed = false;
        report.polled = results.len();
        for (id, result) in results {
            let task = self.session.task_mut(id)?;
            changed |= core::apply_poll_result(task, result);
        }

        for task in self.session.tasks_mut() {
            if task.state() == TaskState::Unknown
                && task.unknown().map(|u| u.kind) == Some(UnknownKind::SubmissionUnverified)
            {
                task.tick_unknown();
                changed = true;
            }
        }
        for task in self.session.tasks_mut() {
            changed |= core::enforce_unknown_bound(task, self.options.max_unknown_polls);
        }
        Ok(changed)
    }

    /// Retrieve output for TERMINATING tasks. Transient failures leave the
    /// task TERMINATING for the next cycle.
    async fn fetch_phase(&mut self, report: &mut CycleReport) -> Result<bool> {
        let mut fetches: JoinSet<(TaskId, BackendResult<()>)> = JoinSet::new();
        let mut immediate: Vec<(TaskId, BackendResult<()>)> = Vec::new();

        for task in self.session.tasks() {
            if task.state() != TaskState::Terminating {
                continue;
            }
            let Some((adapter_name, handle)) = occupied_handle(task) else {
                // No handle to fetch from; conclude with what we have.
                immediate.push((task.id, Ok(())));
                continue;
            };
            let Some(adapter) = self.dispatcher.adapter(adapter_name) else {
                immediate.push((
                    task.id,
                    Err(BackendError::Permanent(format!(
                        "adapter '{adapter_name}' is no longer configured"
                    ))),
                ));
                continue;
            };
            let adapter = adapter.clone();
            let handle = handle.clone();
            let dest = task.output_dir.clone();
            let id = task.id;
            let limit = self.options.op_timeout;
            fetches.spawn(async move {
                let result = with_timeout(limit, "output retrieval", BackendError::Transient, async {
                    adapter.fetch_output(handle, dest).await
                })
                .await;
                (id, result)
            });
        }

        let mut results = immediate;
        while let Some(joined) = fetches.join_next().await {
            results.push(joined.map_err(anyhow::Error::from)?);
        }
        results.sort_by_key(|(id, _)| *id);

        let mut changed = false;
        for (id, result) in results {
            let fetched_ok = result.is_ok();
            let task = self.session.task_mut(id)?;
            changed |= core::apply_fetch_result(task, result);
            if fetched_ok {
                report.fetched += 1;
            }
        }
        Ok(changed)
    }

    /// Reset retryable failures to NEW while attempts remain. Applied to
    /// every TERMINATED task, not just this cycle's, so a resumed session
    /// picks up where the policy left off.
    fn retry_phase(&mut self, report: &mut CycleReport) -> bool {
        let max_retries = self.session.max_retries();
        let mut changed = false;
        for task in self.session.tasks_mut() {
            if core::apply_retry_policy(task, max_retries) {
                report.retried += 1;
                changed = true;
            }
        }
        changed
    }

    /// Plan this cycle's submissions, run them concurrently, and apply the
    /// results in TaskId order.
    async fn submit_phase(&mut self, report: &mut CycleReport) -> Result<bool> {
        let plan = self.dispatcher.plan(&self.session);
        if plan.is_empty() {
            return Ok(false);
        }

        let mut submits: JoinSet<(TaskId, String, BackendResult<BackendHandle>)> = JoinSet::new();
        for assignment in plan {
            let task = self.session.task(assignment.task)?;
            let Some(adapter) = self.dispatcher.adapter(&assignment.adapter) else {
                // plan() only assigns configured adapters.
                continue;
            };
            let request = SubmitRequest {
                task_id: task.id,
                name: task.name.clone(),
                command: task.command.clone(),
                requirements: task.requirements.clone(),
                output_dir: task.output_dir.clone(),
            };
            let adapter = adapter.clone();
            let adapter_name = assignment.adapter;
            let id = task.id;
            let limit = self.options.op_timeout;
            submits.spawn(async move {
                let result =
                    with_timeout(limit, "submission", BackendError::UnknownOutcome, async {
                        adapter.submit(request).await
                    })
                    .await;
                (id, adapter_name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = submits.join_next().await {
            results.push(joined.map_err(anyhow::Error::from)?);
        }
        results.sort_by_key(|(id, _, _)| *id);

        let mut changed = false;
        for (id, adapter_name, result) in results {
            let submitted_ok = result.is_ok();
            let task = self.session.task_mut(id)?;
            changed |= core::apply_submit_result(task, &adapter_name, result);
            if submitted_ok {
                report.submitted += 1;
            } else if task.is_terminal() {
                report.failed += 1;
            }
        }
        Ok(changed)
    }
}
