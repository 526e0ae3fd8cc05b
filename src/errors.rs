// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Backend-level failure classification (`Transient` / `Permanent` /
//! `UnknownOutcome`) lives on [`crate::backend::BackendError`] and is
//! consumed inside the engine, attributed to individual tasks. The variants
//! here are session-level: they are the only errors that propagate to the
//! caller and halt a campaign.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskfarmError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Session store at {path} is corrupt: {reason}")]
    SessionCorruption { path: PathBuf, reason: String },

    #[error("Session at {0} is locked by another engine instance")]
    SessionLocked(PathBuf),

    #[error("Session '{0}' is closed; no further cycles or additions allowed")]
    SessionClosed(String),

    #[error("No usable backend adapters after initialization")]
    NoUsableAdapters,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Duplicate task name within session: {0}")]
    DuplicateTaskName(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskfarmError>;
