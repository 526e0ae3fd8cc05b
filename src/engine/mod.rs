// src/engine/mod.rs

//! The engine control loop.
//!
//! This module ties together:
//! - the session (the only shared mutable resource, persisted per cycle)
//! - the dispatcher (pairs NEW tasks with adapters)
//! - the backend adapters (all remote IO)
//!
//! The pure per-task result application lives in [`core`]; the async/IO
//! shell that talks to adapters with timeouts and intra-cycle concurrency
//! is implemented in [`runtime`]. [`report`] derives progress snapshots
//! from task states.

use std::time::Duration;

use crate::config::EngineSection;
use crate::dispatch::DispatchLimits;

pub mod core;
pub mod report;
pub mod runtime;

pub use report::{CycleReport, ProgressReport};
pub use runtime::Engine;

/// Options driving the engine loop, derived from the `[engine]` config
/// section.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Timeout applied to each adapter operation. An expired poll/fetch/
    /// cancel is treated as a transient failure; an expired *submit* is an
    /// unknown outcome (the job may have been accepted).
    pub op_timeout: Duration,
    /// Consecutive UNKNOWN results after which a task is forced to
    /// TERMINATED(failure).
    pub max_unknown_polls: u32,
    /// Idle sleep between cycles in `run_to_completion`.
    pub poll_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(60),
            max_unknown_polls: 10,
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl EngineOptions {
    pub fn from_config(engine: &EngineSection) -> Self {
        Self {
            op_timeout: Duration::from_secs(engine.op_timeout_secs),
            max_unknown_polls: engine.max_unknown_polls,
            poll_interval: Duration::from_secs(engine.poll_interval_secs),
        }
    }
}

/// Engine-wide dispatch caps from the `[engine]` config section.
pub fn dispatch_limits_from_config(engine: &EngineSection) -> DispatchLimits {
    DispatchLimits {
        max_in_flight: engine.max_in_flight,
        max_submitted: engine.max_submitted,
    }
}
