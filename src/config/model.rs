// src/config/model.rs

//! Configuration data model.
//!
//! `RawConfigFile` is what `toml` deserializes; [`ConfigFile`] is the
//! validated form the rest of the application works with (see
//! [`crate::config::validate`]).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Policy for adapter initialization failures at engine startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitFailurePolicy {
    /// Abort engine startup if any configured adapter fails to initialize.
    Fatal,
    /// Continue with the remaining adapters; abort only if zero initialize.
    Ignore,
}

impl Default for InitFailurePolicy {
    fn default() -> Self {
        InitFailurePolicy::Ignore
    }
}

/// Supported adapter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Run task commands as local processes.
    Local,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub on_init_failure: InitFailurePolicy,
    /// Timeout applied to every single adapter operation, in seconds.
    pub op_timeout_secs: u64,
    /// Consecutive UNKNOWN poll results after which a task is forced to
    /// TERMINATED(failure).
    pub max_unknown_polls: u32,
    /// Engine-wide cap on tasks in SUBMITTED/RUNNING/STOPPED states
    /// combined (0 = unlimited).
    pub max_in_flight: usize,
    /// Engine-wide cap on tasks in SUBMITTED state (0 = unlimited).
    pub max_submitted: usize,
    /// Idle sleep between cycles when running until completion, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            on_init_failure: InitFailurePolicy::default(),
            op_timeout_secs: 60,
            max_unknown_polls: 10,
            max_in_flight: 0,
            max_submitted: 0,
            poll_interval_secs: 30,
        }
    }
}

/// One `[adapter.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSection {
    pub kind: AdapterKind,

    /// Maximum number of tasks this adapter accepts concurrently.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Dispatch priority; lower values are tried first, ties broken by
    /// adapter name.
    #[serde(default)]
    pub priority: u32,

    /// Cores available per task on this adapter; a task asking for more is
    /// not dispatched here. `None` means unconstrained.
    #[serde(default)]
    pub cores: Option<u32>,

    /// Runtime environment tags this adapter provides.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Work directory for adapters that stage job files locally.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

fn default_max_tasks() -> usize {
    1
}

impl Default for AdapterSection {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Local,
            max_tasks: 1,
            priority: 0,
            cores: None,
            tags: Vec::new(),
            workdir: None,
        }
    }
}

/// Raw, unvalidated configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub adapter: BTreeMap<String, AdapterSection>,
}

/// Validated configuration.
///
/// Constructed only through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub adapter: BTreeMap<String, AdapterSection>,
}

impl ConfigFile {
    /// Internal constructor used by the validator once all checks passed.
    pub(crate) fn new_unchecked(
        engine: EngineSection,
        adapter: BTreeMap<String, AdapterSection>,
    ) -> Self {
        Self { engine, adapter }
    }
}
