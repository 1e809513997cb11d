// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`monitor`] follows the action log's change feed and turns changes into
//!   [`DagTask`]s.
//! - [`pool`] runs DagTasks on a fixed number of workers.
//! - [`reminder`] re-delivers actions that are still in the log after a delay.
//! - [`runtime`] wires everything into an [`Engine`].

pub mod monitor;
pub mod pool;
pub mod reminder;
pub mod runtime;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::action::DagAction;
use crate::dag::{DagId, JobName};
use crate::store::DagStateStore;

pub use pool::WorkerPool;
pub use reminder::ReminderScheduler;
pub use runtime::{Engine, EngineHandle};

/// Tunables read from the `[config]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Worker pool width.
    pub num_threads: usize,
    /// Arm a safety reminder for every dispatched action, so actions lost by
    /// a crashed replica are picked up by another one.
    pub multi_active_scheduler_enabled: bool,
    pub reminder_delay: Duration,
    /// How long a quota-denied launch waits before trying again.
    pub quota_retry_delay: Duration,
    pub max_dispatch_attempts: u32,
    pub dispatch_retry_backoff: Duration,
    pub transient_retry_attempts: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            num_threads: 5,
            multi_active_scheduler_enabled: false,
            reminder_delay: Duration::from_secs(30),
            quota_retry_delay: Duration::from_secs(10),
            max_dispatch_attempts: 3,
            dispatch_retry_backoff: Duration::from_millis(500),
            transient_retry_attempts: 3,
        }
    }
}

/// One unit of work for the pool: an action plus the store it runs against.
#[derive(Clone)]
pub struct DagTask {
    pub action: DagAction,
    pub store: Arc<dyn DagStateStore>,
}

impl DagTask {
    pub fn new(action: DagAction, store: Arc<dyn DagStateStore>) -> Self {
        Self { action, store }
    }
}

impl fmt::Debug for DagTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagTask")
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// How a flow execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Succeeded,
    Failed { failed_jobs: Vec<JobName> },
    /// The flow could not be compiled; no Dag was ever created.
    CompilationFailed,
    TimedOut,
    Killed,
}

/// Published once per finished, killed, timed-out or uncompilable flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEvent {
    pub dag_id: DagId,
    pub outcome: FlowOutcome,
}
