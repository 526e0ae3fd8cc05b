// src/task/history.rs

//! Append-only transition history of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskState;

/// One recorded state transition.
///
/// Entries are only ever appended; existing entries are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub from: TaskState,
    pub to: TaskState,
    pub reason: String,
}

impl HistoryEntry {
    pub fn now(from: TaskState, to: TaskState, reason: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            from,
            to,
            reason: reason.into(),
        }
    }
}
