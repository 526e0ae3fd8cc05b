// src/session/mod.rs

//! Durable, named collections of tasks.
//!
//! A [`Session`] owns the tasks of one campaign plus the session-scoped ID
//! counter and retry bound. Task IDs are allocated monotonically, so the
//! `BTreeMap` iteration order is exactly insertion order, which is what
//! reporting and FIFO dispatch rely on.
//!
//! Persistence is mediated solely through [`store::SessionStore`].

pub mod store;

use std::collections::BTreeMap;

use crate::errors::{Result, TaskfarmError};
use crate::task::{Task, TaskId, TaskSpec, TaskState};

pub use store::{SessionLock, SessionStore};

/// A persistent, ordered collection of tasks with stable identity.
#[derive(Debug)]
pub struct Session {
    name: String,
    /// Maximum resubmission attempts per task; fixed at session creation.
    max_retries: u32,
    /// Set by `abort`; a closed session accepts no new tasks or cycles.
    closed: bool,
    next_task_id: u64,
    tasks: BTreeMap<TaskId, Task>,
}

impl Session {
    pub fn new(name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            max_retries,
            closed: false,
            next_task_id: 0,
            tasks: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        name: String,
        max_retries: u32,
        closed: bool,
        next_task_id: u64,
        tasks: BTreeMap<TaskId, Task>,
    ) -> Self {
        Self {
            name,
            max_retries,
            closed,
            next_task_id,
            tasks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn next_task_id(&self) -> u64 {
        self.next_task_id
    }

    /// Add a task, allocating the next session-scoped ID.
    ///
    /// Task names must be unique within a session (they may collide across
    /// sessions).
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId> {
        if self.closed {
            return Err(TaskfarmError::SessionClosed(self.name.clone()));
        }
        if self.tasks.values().any(|t| t.name == spec.name) {
            return Err(TaskfarmError::DuplicateTaskName(spec.name));
        }

        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        self.tasks.insert(id, Task::new(id, spec));
        Ok(id)
    }

    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| TaskfarmError::TaskNotFound(id.to_string()))
    }

    pub fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| TaskfarmError::TaskNotFound(id.to_string()))
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// IDs of tasks currently in the given state, insertion order.
    pub fn tasks_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.state() == state)
            .map(|t| t.id)
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::task::ResourceRequirements;

    fn spec(name: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            command: vec!["true".to_string()],
            requirements: ResourceRequirements::default(),
            output_dir: PathBuf::from("out"),
        }
    }

    #[test]
    fn ids_are_monotonic_and_iteration_is_insertion_order() {
        let mut s = Session::new("camp", 2);
        let a = s.add_task(spec("a")).unwrap();
        let b = s.add_task(spec("b")).unwrap();
        let c = s.add_task(spec("c")).unwrap();
        assert!(a < b && b < c);

        let names: Vec<_> = s.tasks().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_names_rejected_within_session() {
        let mut s = Session::new("camp", 2);
        s.add_task(spec("a")).unwrap();
        let err = s.add_task(spec("a")).unwrap_err();
        assert!(matches!(err, TaskfarmError::DuplicateTaskName(_)));
    }

    #[test]
    fn closed_session_rejects_new_tasks() {
        let mut s = Session::new("camp", 2);
        s.close();
        let err = s.add_task(spec("a")).unwrap_err();
        assert!(matches!(err, TaskfarmError::SessionClosed(_)));
    }
}
