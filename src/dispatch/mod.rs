// src/dispatch/mod.rs

//! Matching NEW tasks to backend adapters.
//!
//! The dispatcher is a pure planner: given the current session it returns
//! the `(task, adapter)` assignments for this cycle and mutates nothing.
//! The engine shell then performs the actual submissions.
//!
//! Policy: first-fit over the priority-ordered list of usable adapters:
//! an adapter takes a task iff it has spare concurrency capacity and
//! `can_satisfy` the task's declared resource requirements. Tasks are
//! considered in insertion order (FIFO fairness: no task is starved while
//! capacity exists). A task no adapter can take this cycle simply stays
//! NEW and is reconsidered next cycle.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::backend::BackendAdapter;
use crate::session::Session;
use crate::task::{TaskId, TaskState};

/// One planned submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task: TaskId,
    pub adapter: String,
}

/// Engine-wide dispatch caps (0 = unlimited).
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchLimits {
    /// Cap on tasks in SUBMITTED/RUNNING/STOPPED combined.
    pub max_in_flight: usize,
    /// Cap on tasks in SUBMITTED.
    pub max_submitted: usize,
}

/// Pairs pending tasks with adapters.
pub struct Dispatcher {
    /// Priority order as produced by `backend::build_adapters`.
    adapters: Vec<Arc<dyn BackendAdapter>>,
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(adapters: Vec<Arc<dyn BackendAdapter>>, limits: DispatchLimits) -> Self {
        Self { adapters, limits }
    }

    pub fn adapters(&self) -> &[Arc<dyn BackendAdapter>] {
        &self.adapters
    }

    /// Look up an adapter by name (for poll/fetch/cancel on tasks that
    /// already carry an assignment).
    pub fn adapter(&self, name: &str) -> Option<&Arc<dyn BackendAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    /// Plan this cycle's submissions.
    pub fn plan(&self, session: &Session) -> Vec<Assignment> {
        // Slots currently occupied per adapter: any task holding a handle,
        // plus UNKNOWN tasks whose submission is attributed to an adapter
        // (conservative, since their remote job may exist).
        let mut busy: HashMap<&str, usize> = HashMap::new();
        let mut in_flight = 0usize;
        let mut submitted = 0usize;
        for task in session.tasks() {
            if let Some(name) = task.occupied_adapter() {
                *busy.entry(name).or_default() += 1;
            }
            match task.state() {
                TaskState::Submitted => {
                    submitted += 1;
                    in_flight += 1;
                }
                TaskState::Running | TaskState::Stopped => in_flight += 1,
                _ => {}
            }
        }

        let mut free: Vec<(usize, usize)> = self
            .adapters
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let used = busy.get(a.name()).copied().unwrap_or(0);
                (i, a.max_tasks().saturating_sub(used))
            })
            .collect();

        let limit_in_flight = cap(self.limits.max_in_flight);
        let limit_submitted = cap(self.limits.max_submitted);

        let mut assignments = Vec::new();

        for task in session.tasks() {
            if task.state() != TaskState::New {
                continue;
            }
            if in_flight >= limit_in_flight || submitted >= limit_submitted {
                debug!(
                    task = %task.id,
                    in_flight,
                    submitted,
                    "engine-wide limit reached; leaving task NEW"
                );
                break;
            }

            let fit = free.iter_mut().find(|(idx, slots)| {
                *slots > 0 && self.adapters[*idx].can_satisfy(&task.requirements)
            });

            match fit {
                Some((idx, slots)) => {
                    let adapter = self.adapters[*idx].name().to_string();
                    debug!(task = %task.id, adapter = %adapter, "planned submission");
                    *slots -= 1;
                    in_flight += 1;
                    submitted += 1;
                    assignments.push(Assignment {
                        task: task.id,
                        adapter,
                    });
                }
                None => {
                    // No adapter can take this task this cycle; it stays NEW.
                    debug!(task = %task.id, "no adapter with capacity; task stays NEW");
                }
            }
        }

        assignments
    }
}

fn cap(limit: usize) -> usize {
    if limit == 0 { usize::MAX } else { limit }
}
