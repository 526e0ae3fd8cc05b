// src/backend/local.rs

//! Reference backend adapter: run task commands as local processes.
//!
//! Each submitted task gets a private work directory under the adapter's
//! configured `workdir`; stdout/stderr are captured to files there, and
//! `fetch_output` copies the whole directory to the task's destination
//! before cleaning it up. Cancellation kills the child process via a
//! oneshot channel.
//!
//! Handles are only valid within one engine process: after a restart, a
//! poll on an old handle reports a permanent failure and the retry policy
//! takes over.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::Command;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::backend::{
    BackendAdapter, BackendError, BackendHandle, BackendResult, BoxFuture, RemoteOutcome,
    RemoteStatus, SubmitRequest,
};
use crate::config::AdapterSection;
use crate::errors::Result;
use crate::task::ResourceRequirements;

#[derive(Debug)]
enum JobPhase {
    Running,
    Done(RemoteOutcome),
}

#[derive(Debug)]
struct LocalJob {
    workdir: PathBuf,
    cancel: Option<oneshot::Sender<()>>,
    phase: JobPhase,
}

/// Backend adapter executing commands on the local machine.
pub struct LocalAdapter {
    name: String,
    max_tasks: usize,
    cores: Option<u32>,
    tags: Vec<String>,
    workdir: PathBuf,
    jobs: Arc<Mutex<HashMap<BackendHandle, LocalJob>>>,
    seq: AtomicU64,
}

impl LocalAdapter {
    /// Build the adapter from its `[adapter.<name>]` config section.
    ///
    /// Creating the work directory is the initialization step that can fail
    /// (and is subject to the `on_init_failure` policy).
    pub fn from_config(name: &str, section: &AdapterSection) -> Result<Self> {
        let workdir = section
            .workdir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".taskfarm").join(name));
        std::fs::create_dir_all(&workdir)?;

        Ok(Self {
            name: name.to_string(),
            max_tasks: section.max_tasks,
            cores: section.cores,
            tags: section.tags.clone(),
            workdir,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            seq: AtomicU64::new(0),
        })
    }

    fn next_handle(&self, req: &SubmitRequest) -> BackendHandle {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        BackendHandle::new(format!("{}.{}.{}", self.name, req.task_id, n))
    }
}

impl BackendAdapter for LocalAdapter {
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
        let handle = self.next_handle(&req);
        let jobdir = self.workdir.join(handle.as_str());
        let jobs = Arc::clone(&self.jobs);
        let adapter_name = self.name.clone();

        Box::pin(async move {
            let program = req.command.first().ok_or_else(|| {
                BackendError::Permanent(format!("task '{}' has an empty command", req.name))
            })?;

            tokio::fs::create_dir_all(&jobdir).await.map_err(|e| {
                BackendError::Transient(format!("creating job dir {:?}: {e}", jobdir))
            })?;

            let stdout = std::fs::File::create(jobdir.join("stdout.log"))
                .map_err(|e| BackendError::Transient(format!("creating stdout.log: {e}")))?;
            let stderr = std::fs::File::create(jobdir.join("stderr.log"))
                .map_err(|e| BackendError::Transient(format!("creating stderr.log: {e}")))?;

            let mut cmd = Command::new(program);
            cmd.args(&req.command[1..])
                .current_dir(&jobdir)
                .stdin(Stdio::null())
                .stdout(Stdio::from(stdout))
                .stderr(Stdio::from(stderr))
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    BackendError::Permanent(format!("spawning '{program}': {e}"))
                }
                _ => BackendError::Transient(format!("spawning '{program}': {e}")),
            })?;

            info!(
                adapter = %adapter_name,
                task = %req.task_id,
                handle = %handle,
                cmd = %program,
                "local process started"
            );

            let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

            {
                let mut guard = jobs.lock().await;
                guard.insert(
                    handle.clone(),
                    LocalJob {
                        workdir: jobdir,
                        cancel: Some(cancel_tx),
                        phase: JobPhase::Running,
                    },
                );
            }

            // Waiter: record the outcome in the shared job table when the
            // process exits, or kill it on cancellation.
            let waiter_jobs = Arc::clone(&jobs);
            let waiter_handle = handle.clone();
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    status_res = child.wait() => match status_res {
                        Ok(status) if status.success() => RemoteOutcome::Success,
                        Ok(status) => RemoteOutcome::Failure(format!(
                            "exit code {}",
                            status.code().unwrap_or(-1)
                        )),
                        Err(e) => RemoteOutcome::Failure(format!("wait failed: {e}")),
                    },
                    _ = &mut cancel_rx => {
                        if let Err(e) = child.kill().await {
                            warn!(handle = %waiter_handle, error = %e, "failed to kill child on cancel");
                        }
                        RemoteOutcome::Failure("cancelled".to_string())
                    }
                };

                let mut guard = waiter_jobs.lock().await;
                if let Some(job) = guard.get_mut(&waiter_handle) {
                    debug!(handle = %waiter_handle, ?outcome, "local process finished");
                    job.phase = JobPhase::Done(outcome);
                }
            });

            Ok(handle)
        })
    }

    fn poll(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<RemoteStatus>> {
        let jobs = Arc::clone(&self.jobs);

        Box::pin(async move {
            let guard = jobs.lock().await;
            match guard.get(&handle) {
                Some(job) => Ok(match &job.phase {
                    JobPhase::Running => RemoteStatus::Running,
                    JobPhase::Done(outcome) => RemoteStatus::Done(outcome.clone()),
                }),
                // A handle this adapter instance never issued (or issued in a
                // previous process life): the job cannot be tracked any more.
                None => Err(BackendError::Permanent(format!(
                    "unknown local job handle '{handle}'"
                ))),
            }
        })
    }

    fn fetch_output(
        &self,
        handle: BackendHandle,
        dest: PathBuf,
    ) -> BoxFuture<'_, BackendResult<()>> {
        let jobs = Arc::clone(&self.jobs);

        Box::pin(async move {
            let workdir = {
                let guard = jobs.lock().await;
                match guard.get(&handle) {
                    Some(job) => job.workdir.clone(),
                    None => {
                        return Err(BackendError::Permanent(format!(
                            "unknown local job handle '{handle}'"
                        )));
                    }
                }
            };

            tokio::fs::create_dir_all(&dest)
                .await
                .map_err(|e| BackendError::Transient(format!("creating {:?}: {e}", dest)))?;

            let mut entries = tokio::fs::read_dir(&workdir)
                .await
                .map_err(|e| BackendError::Transient(format!("reading {:?}: {e}", workdir)))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BackendError::Transient(format!("reading {:?}: {e}", workdir)))?
            {
                let from = entry.path();
                if from.is_file() {
                    let to = dest.join(entry.file_name());
                    tokio::fs::copy(&from, &to).await.map_err(|e| {
                        BackendError::Transient(format!("copying {:?} to {:?}: {e}", from, to))
                    })?;
                }
            }

            // Only clean up once the copy is confirmed complete.
            if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
                warn!(handle = %handle, error = %e, "could not remove job workdir after fetch");
            }
            jobs.lock().await.remove(&handle);

            debug!(handle = %handle, dest = ?dest, "output fetched");
            Ok(())
        })
    }

    fn cancel(&self, handle: BackendHandle) -> BoxFuture<'_, BackendResult<()>> {
        let jobs = Arc::clone(&self.jobs);

        Box::pin(async move {
            let mut guard = jobs.lock().await;
            if let Some(job) = guard.get_mut(&handle) {
                if let Some(cancel) = job.cancel.take() {
                    // Receiver gone means the process already finished.
                    let _ = cancel.send(());
                }
            }
            Ok(())
        })
    }
}
