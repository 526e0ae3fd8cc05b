// src/backend/mod.rs

//! Pluggable backend adapter abstraction.
//!
//! The engine talks to a [`BackendAdapter`] for every remote operation
//! ({submit, poll, fetch_output, cancel}); one implementation exists per
//! execution substrate. Production ships the [`local`] adapter; tests use
//! the scripted fake from `taskfarm-test-utils`.
//!
//! Every operation classifies its failures as `Transient` (retry later, no
//! task state change beyond the UNKNOWN bookkeeping), `Permanent` (force
//! the failure trajectory), or, for submission only, `UnknownOutcome`
//! (the remote side may or may not have accepted the job).

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::config::{AdapterKind, AdapterSection, InitFailurePolicy};
use crate::errors::{Result, TaskfarmError};
use crate::task::{ResourceRequirements, TaskId};

pub mod local;

pub use local::LocalAdapter;

/// Boxed future type used by the object-safe adapter trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Adapter-specific opaque token for a submitted job (e.g. a remote job id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendHandle(String);

impl BackendHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exit outcome reported by a backend for a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Success,
    Failure(String),
}

/// Status of a remote job as reported by `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Stopped,
    Done(RemoteOutcome),
    Unknown,
}

/// Failure classification for adapter operations.
///
/// Misclassification is the cardinal sin of an adapter: a transient failure
/// reported as nothing stalls a session forever, a transient reported as
/// permanent abandons recoverable jobs.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("permanent backend failure: {0}")]
    Permanent(String),

    #[error("submission outcome unknown: {0}")]
    UnknownOutcome(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Everything an adapter needs to submit one task.
///
/// Owned data so submission futures don't borrow the session.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub task_id: TaskId,
    pub name: String,
    pub command: Vec<String>,
    pub requirements: ResourceRequirements,
    pub output_dir: PathBuf,
}

/// Capability interface over one execution substrate.
///
/// Object-safe: async operations return manually boxed futures so adapters
/// can live behind `Arc<dyn BackendAdapter>`.
pub trait BackendAdapter: Send + Sync {
    /// Adapter name as configured (unique among adapters).
    fn name(&self) -> &str;

    /// Maximum number of tasks this adapter accepts concurrently.
    fn max_tasks(&self) -> usize;

    /// Whether this adapter can in principle satisfy the given resource
    /// requirements.
    fn can_satisfy(&self, req: &ResourceRequirements) -> bool;

    /// Submit one task. Must be called at most once per dispatch attempt.
    ///
    /// On an ambiguous failure (e.g. a network timeout mid-submission) the
    /// adapter must return [`BackendError::UnknownOutcome`] rather than
    /// guessing, so the engine never double-submits a job that actually
    /// went through.
    fn submit(&self, req: SubmitRequest) -> BoxFuture<'_, BackendResult<BackendHandle>>;

    /// Query the status of a submitted job. Idempotent and side-effect-free
    /// on the remote resource.
    fn poll(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<RemoteStatus>>;

    /// Copy result artifacts to `dest`. Must not delete remote artifacts
    /// until the copy is confirmed complete.
    fn fetch_output(
        &self,
        handle: BackendHandle,
        dest: PathBuf,
    ) -> BoxFuture<'_, BackendResult<()>>;

    /// Best-effort cancel. A failure here never blocks the local state
    /// transition.
    fn cancel(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<()>>;
}

/// Instantiate all configured adapters, honoring the initialization-failure
/// policy:
///
/// - `fatal`: any adapter failing to initialize aborts engine startup.
/// - `ignore`: failed adapters are skipped; startup aborts only if zero
///   adapters remain usable.
///
/// Adapters are returned in dispatch priority order (priority value, then
/// name).
pub fn build_adapters(
    adapters: &BTreeMap<String, AdapterSection>,
    policy: InitFailurePolicy,
) -> Result<Vec<Arc<dyn BackendAdapter>>> {
    let mut ordered: Vec<(&String, &AdapterSection)> = adapters.iter().collect();
    ordered.sort_by_key(|(name, section)| (section.priority, (*name).clone()));

    let mut built: Vec<Arc<dyn BackendAdapter>> = Vec::new();

    for (name, section) in ordered {
        match instantiate(name, section) {
            Ok(adapter) => built.push(adapter),
            Err(err) => match policy {
                InitFailurePolicy::Fatal => {
                    error!(adapter = %name, error = %err, "adapter initialization failed");
                    return Err(TaskfarmError::ConfigError(format!(
                        "adapter '{name}' failed to initialize: {err}"
                    )));
                }
                InitFailurePolicy::Ignore => {
                    warn!(
                        adapter = %name,
                        error = %err,
                        "adapter initialization failed; continuing without it"
                    );
                }
            },
        }
    }

    if built.is_empty() {
        return Err(TaskfarmError::NoUsableAdapters);
    }

    Ok(built)
}

fn instantiate(name: &str, section: &AdapterSection) -> Result<Arc<dyn BackendAdapter>> {
    match section.kind {
        AdapterKind::Local => Ok(Arc::new(LocalAdapter::from_config(name, section)?)),
    }
}
