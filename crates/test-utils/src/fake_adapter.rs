use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use taskfarm::backend::{
    BackendAdapter, BackendError, BackendHandle, BackendResult, BoxFuture, RemoteOutcome,
    RemoteStatus, SubmitRequest,
};
use taskfarm::task::ResourceRequirements;

/// One recorded adapter call, keyed by task name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit(String),
    Poll(String),
    Fetch(String),
    Cancel(String),
}

/// Scripted reaction to one submission attempt for a task.
#[derive(Debug, Clone)]
pub enum SubmitBehaviour {
    Accept,
    Transient(String),
    Permanent(String),
    Ambiguous(String),
}

/// A fake adapter that:
/// - records every call it receives (see [`FakeAdapter::calls`])
/// - reacts to submissions per scripted [`SubmitBehaviour`] (default: accept)
/// - answers polls from a per-task script of statuses, repeating the last
///   entry once the script is exhausted (default: `Done(Success)`).
///
/// Handles encode the task name (`fake:<adapter>:<task>:<attempt>`), so
/// scripts survive resubmission: a retried task keeps consuming the same
/// poll script.
pub struct FakeAdapter {
    name: String,
    max_tasks: usize,
    cores: Option<u32>,
    tags: Vec<String>,
    submit_plans: Mutex<HashMap<String, VecDeque<SubmitBehaviour>>>,
    poll_scripts: Mutex<HashMap<String, VecDeque<BackendResult<RemoteStatus>>>>,
    fetch_failures: Mutex<HashMap<String, VecDeque<BackendError>>>,
    calls: Mutex<Vec<Call>>,
    next_attempt: AtomicU64,
}

impl FakeAdapter {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            max_tasks: usize::MAX,
            cores: None,
            tags: vec![],
            submit_plans: Mutex::new(HashMap::new()),
            poll_scripts: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_attempt: AtomicU64::new(0),
        })
    }

    /// Like [`new`](Self::new), but with capacity and capability limits.
    pub fn with_limits(name: &str, max_tasks: usize, cores: Option<u32>, tags: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            max_tasks,
            cores,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            submit_plans: Mutex::new(HashMap::new()),
            poll_scripts: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_attempt: AtomicU64::new(0),
        })
    }

    /// Queue a reaction for the next submission attempts of `task`.
    /// Unqueued attempts are accepted.
    pub fn on_submit(&self, task: &str, behaviour: SubmitBehaviour) {
        self.submit_plans
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push_back(behaviour);
    }

    /// Script the statuses successive polls of `task` will report. The last
    /// entry repeats once consumed.
    pub fn script_poll(&self, task: &str, statuses: Vec<BackendResult<RemoteStatus>>) {
        self.poll_scripts
            .lock()
            .unwrap()
            .insert(task.to_string(), statuses.into());
    }

    /// Queue a failure for the next output retrievals of `task`. Unqueued
    /// retrievals succeed.
    pub fn fail_fetch(&self, task: &str, error: BackendError) {
        self.fetch_failures
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submit_count(&self, task: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Submit(name) if name == task))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn task_of(&self, handle: &BackendHandle) -> String {
        handle
            .as_str()
            .split(':')
            .nth(2)
            .unwrap_or("?")
            .to_string()
    }
}

impl BackendAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    fn can_satisfy(&self, req: &ResourceRequirements) -> bool {
        if let Some(cores) = self.cores {
            if req.cores > cores {
                return false;
            }
        }
        if let Some(tag) = &req.runtime_tag {
            if !self.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }

    fn submit(&self, req: SubmitRequest) -> BoxFuture<'_, BackendResult<BackendHandle>> {
        Box::pin(async move {
            self.record(Call::Submit(req.name.clone()));
            let behaviour = self
                .submit_plans
                .lock()
                .unwrap()
                .get_mut(&req.name)
                .and_then(|plans| plans.pop_front())
                .unwrap_or(SubmitBehaviour::Accept);
            match behaviour {
                SubmitBehaviour::Accept => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    Ok(BackendHandle::new(format!(
                        "fake:{}:{}:{attempt}",
                        self.name, req.name
                    )))
                }
                SubmitBehaviour::Transient(msg) => Err(BackendError::Transient(msg)),
                SubmitBehaviour::Permanent(msg) => Err(BackendError::Permanent(msg)),
                SubmitBehaviour::Ambiguous(msg) => Err(BackendError::UnknownOutcome(msg)),
            }
        })
    }

    fn poll(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<RemoteStatus>> {
        Box::pin(async move {
            let task = self.task_of(&handle);
            self.record(Call::Poll(task.clone()));
            let mut scripts = self.poll_scripts.lock().unwrap();
            match scripts.get_mut(&task) {
                Some(script) if script.len() > 1 => script.pop_front().unwrap(),
                Some(script) => script
                    .front()
                    .cloned()
                    .unwrap_or(Ok(RemoteStatus::Done(RemoteOutcome::Success))),
                None => Ok(RemoteStatus::Done(RemoteOutcome::Success)),
            }
        })
    }

    fn fetch_output(
        &self,
        handle: BackendHandle,
        _dest: PathBuf,
    ) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let task = self.task_of(&handle);
            self.record(Call::Fetch(task.clone()));
            match self
                .fetch_failures
                .lock()
                .unwrap()
                .get_mut(&task)
                .and_then(|errors| errors.pop_front())
            {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn cancel(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            self.record(Call::Cancel(self.task_of(&handle)));
            Ok(())
        })
    }
}
