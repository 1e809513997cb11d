// src/store/mod.rs

//! Persisted Dag state plus the DagAction bookkeeping processors rely on.
//!
//! Processors never hold a Dag across an await point without first taking the
//! per-Dag critical section, and node writes go through
//! [`DagStateStore::add_dag_node_state`], which only applies forward status
//! transitions. Together these keep two replicas from launching the same job.

pub mod memory;
pub mod quota;
pub mod status;

use std::sync::Arc;

use crate::action::{DagAction, DagActionType};
use crate::dag::{Dag, DagId, DagNode, DagNodeId, FlowFailure};
use crate::errors::Result;

pub use memory::InMemoryDagStateStore;
pub use quota::{QuotaDecision, QuotaGate, QuotaLimits};
pub use status::{InMemoryStatusFeed, JobStatus, StatusFeed};

/// Outcome of a conditional node write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStateChange {
    /// The new status was persisted.
    Applied,
    /// The stored node already moved past (or to) that status.
    Stale,
    /// The Dag (or the job within it) is gone.
    Missing,
}

impl NodeStateChange {
    pub fn is_applied(self) -> bool {
        self == NodeStateChange::Applied
    }
}

pub trait DagStateStore: Send + Sync {
    /// Per-Dag mutual exclusion. Every processor holds it for the whole of
    /// its run.
    fn critical_section(&self, dag_id: &DagId) -> Result<Arc<tokio::sync::Mutex<()>>>;

    /// Persist a freshly compiled Dag. Fails with
    /// [`FlowdagError::DuplicateDag`](crate::errors::FlowdagError::DuplicateDag)
    /// when one with the same id is live.
    fn add_dag(&self, dag: &Dag) -> Result<()>;

    fn get_dag(&self, dag_id: &DagId) -> Result<Option<Dag>>;

    /// Remove a Dag, release any quota its nodes still hold and forget the
    /// job statuses reported for it.
    fn delete_dag(&self, dag_id: &DagId) -> Result<bool>;

    /// Forget job statuses reported for an execution that is not live.
    fn forget_job_statuses(&self, dag_id: &DagId) -> Result<()>;

    /// The stored node plus the latest externally reported status, if any.
    fn get_dag_node_with_job_status(
        &self,
        node_id: &DagNodeId,
    ) -> Result<(Option<DagNode>, Option<JobStatus>)>;

    /// Persist `node.status` if it is a forward transition from the stored
    /// status. Terminal transitions release the node's quota.
    fn add_dag_node_state(&self, node: &DagNode, dag_id: &DagId) -> Result<NodeStateChange>;

    /// Record why a Dag stopped launching. The first failure wins.
    fn fail_dag(&self, dag_id: &DagId, failure: FlowFailure) -> Result<NodeStateChange>;

    fn has_running_jobs(&self, dag_id: &DagId) -> Result<bool>;

    fn add_flow_dag_action(&self, dag_id: &DagId, action_type: DagActionType) -> Result<bool>;

    fn add_job_dag_action(&self, node_id: &DagNodeId, action_type: DagActionType)
    -> Result<bool>;

    fn dag_action_exists(&self, action: &DagAction) -> Result<bool>;

    fn delete_dag_action(&self, action: &DagAction) -> Result<bool>;

    /// Remove every pending action of one flow execution.
    fn delete_dag_actions(&self, dag_id: &DagId) -> Result<usize>;

    fn try_acquire_quota(&self, nodes: &[DagNode]) -> Result<QuotaDecision>;

    fn release_quota(&self, node: &DagNode) -> Result<bool>;
}
