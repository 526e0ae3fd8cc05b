// src/session/store.rs

//! Durable storage for sessions.
//!
//! A session lives in a directory containing:
//! - `session.json`: the whole session, one JSON record per task. Written
//!   via write-temp-then-rename so a crash mid-write never corrupts the
//!   previously durable state.
//! - `lock`: advisory lock file, created exclusively while an engine holds
//!   the session open. Serializes ID allocation between concurrent engine
//!   instances.
//!
//! The format is forward compatible: unknown fields are ignored on load and
//! fields added later carry `#[serde(default)]`, so sessions survive engine
//! upgrades. A file that fails to parse is a fatal
//! [`TaskfarmError::SessionCorruption`]; durable-state integrity is never
//! silently "recovered".

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, TaskfarmError};
use crate::session::Session;
use crate::task::Task;

const STORE_FILE: &str = "session.json";
const LOCK_FILE: &str = "lock";

/// On-disk form of a session.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    name: String,
    #[serde(default)]
    max_retries: u32,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    next_task_id: u64,
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Handle to a session directory.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    /// Whether a session already exists at this location.
    pub fn exists(&self) -> bool {
        self.store_path().is_file()
    }

    /// Create the session directory and write the initial state.
    pub fn create(&self, session: &Session) -> Result<()> {
        if self.exists() {
            return Err(TaskfarmError::ConfigError(format!(
                "session already exists at {:?}",
                self.dir
            )));
        }
        fs::create_dir_all(&self.dir)?;
        self.save(session)?;
        info!(session = %session.name(), dir = ?self.dir, "session created");
        Ok(())
    }

    /// Load the session from durable storage.
    pub fn load(&self) -> Result<Session> {
        let path = self.store_path();
        let contents = fs::read_to_string(&path)?;

        let record: SessionRecord =
            serde_json::from_str(&contents).map_err(|e| TaskfarmError::SessionCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut tasks = BTreeMap::new();
        for task in record.tasks {
            if tasks.insert(task.id, task).is_some() {
                return Err(TaskfarmError::SessionCorruption {
                    path,
                    reason: "duplicate task id in store".to_string(),
                });
            }
        }

        // The counter must stay ahead of every allocated ID, even if an
        // older engine version persisted a stale value.
        let min_next = tasks.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        let next_task_id = record.next_task_id.max(min_next);

        debug!(session = %record.name, tasks = tasks.len(), "session loaded");

        Ok(Session::from_parts(
            record.name,
            record.max_retries,
            record.closed,
            next_task_id,
            tasks,
        ))
    }

    /// Persist the session atomically (write temp file, then rename).
    pub fn save(&self, session: &Session) -> Result<()> {
        let record = SessionRecord {
            name: session.name().to_string(),
            max_retries: session.max_retries(),
            closed: session.is_closed(),
            next_task_id: session.next_task_id(),
            tasks: session.tasks().cloned().collect(),
        };

        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| TaskfarmError::Other(e.into()))?;

        let path = self.store_path();
        let tmp = self.dir.join(format!("{STORE_FILE}.tmp"));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;

        debug!(session = %session.name(), tasks = session.len(), "session persisted");
        Ok(())
    }

    /// Take the advisory lock for this session directory.
    ///
    /// Fails with [`TaskfarmError::SessionLocked`] if another engine
    /// instance holds it.
    pub fn lock(&self) -> Result<SessionLock> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(SessionLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(TaskfarmError::SessionLocked(self.dir.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Held advisory lock; removed on drop.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = ?self.path, error = %e, "could not remove session lock file");
        }
    }
}
