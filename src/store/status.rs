// src/store/status.rs

//! Latest externally reported job statuses.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::{DagId, DagNodeId};
use crate::errors::{FlowdagError, Result};
use crate::types::ExecutionStatus;

/// Snapshot of what the runtime last said about a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobStatus {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Source of job completion telemetry.
///
/// The engine never subscribes to it; it reads the latest snapshot at the
/// start of each REEVALUATE.
pub trait StatusFeed: Send + Sync {
    fn latest_status(&self, node_id: &DagNodeId) -> Result<Option<JobStatus>>;

    /// Drop every status recorded for one flow execution.
    fn forget(&self, dag_id: &DagId) -> Result<()>;
}

/// [`StatusFeed`] that executors (or tests) write into directly.
#[derive(Debug, Default)]
pub struct InMemoryStatusFeed {
    statuses: Mutex<HashMap<DagNodeId, JobStatus>>,
}

impl InMemoryStatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, node_id: DagNodeId, status: JobStatus) -> Result<()> {
        debug!(job = %node_id, status = %status.status, "job status reported");
        self.statuses
            .lock()
            .map_err(|_| FlowdagError::poisoned("status feed"))?
            .insert(node_id, status);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .statuses
            .lock()
            .map_err(|_| FlowdagError::poisoned("status feed"))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl StatusFeed for InMemoryStatusFeed {
    fn latest_status(&self, node_id: &DagNodeId) -> Result<Option<JobStatus>> {
        let statuses = self
            .statuses
            .lock()
            .map_err(|_| FlowdagError::poisoned("status feed"))?;
        Ok(statuses.get(node_id).cloned())
    }

    fn forget(&self, dag_id: &DagId) -> Result<()> {
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| FlowdagError::poisoned("status feed"))?;
        let before = statuses.len();
        statuses.retain(|id, _| &id.dag_id != dag_id);
        debug!(dag = %dag_id, dropped = before - statuses.len(), "job statuses forgotten");
        Ok(())
    }
}
