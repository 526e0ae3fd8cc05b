// src/task/requirements.rs

//! Declared resource requirements of a task.
//!
//! The core never interprets these values; backend adapters decide whether
//! they can satisfy them via [`crate::backend::BackendAdapter::can_satisfy`].

use serde::{Deserialize, Serialize};

/// What a task asks of the execution substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Number of cores the task wants.
    #[serde(default = "default_cores")]
    pub cores: u32,

    /// Memory per core, in MiB.
    #[serde(default)]
    pub memory_mb_per_core: Option<u64>,

    /// Wall-clock limit, in seconds.
    #[serde(default)]
    pub walltime_secs: Option<u64>,

    /// Required runtime environment tag (e.g. an application image name).
    ///
    /// An adapter satisfies this only if the tag appears in its configured
    /// tag list.
    #[serde(default)]
    pub runtime_tag: Option<String>,
}

fn default_cores() -> u32 {
    1
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cores: 1,
            memory_mb_per_core: None,
            walltime_secs: None,
            runtime_tag: None,
        }
    }
}
