#![allow(dead_code)]

use std::path::PathBuf;

use taskfarm::session::Session;
use taskfarm::task::{ResourceRequirements, TaskId, TaskSpec};

/// Builder for `TaskSpec` to simplify test setup.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: TaskSpec {
                name: name.to_string(),
                command: vec!["true".to_string()],
                requirements: ResourceRequirements::default(),
                output_dir: PathBuf::from(format!("out/{name}")),
            },
        }
    }

    pub fn command(mut self, parts: &[&str]) -> Self {
        self.spec.command = parts.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn cores(mut self, cores: u32) -> Self {
        self.spec.requirements.cores = cores;
        self
    }

    pub fn runtime_tag(mut self, tag: &str) -> Self {
        self.spec.requirements.runtime_tag = Some(tag.to_string());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec.output_dir = dir.into();
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Shorthand for a default spec with the given name.
pub fn task_spec(name: &str) -> TaskSpec {
    TaskSpecBuilder::new(name).build()
}

/// A session containing one default task per name, in order.
pub fn session_with_tasks(max_retries: u32, names: &[&str]) -> (Session, Vec<TaskId>) {
    let mut session = Session::new("test-session", max_retries);
    let ids = names
        .iter()
        .map(|name| {
            session
                .add_task(task_spec(name))
                .expect("task names must be unique")
        })
        .collect();
    (session, ids)
}
