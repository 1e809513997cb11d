// src/dag/model.rs

//! Identity and entity types for one flow execution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionStatus, FailureOption};

/// Canonical job name type, unique within one Dag.
pub type JobName = String;

/// Names one in-flight flow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DagId {
    pub flow_group: String,
    pub flow_name: String,
    pub flow_execution_id: i64,
}

impl DagId {
    pub fn new(
        flow_group: impl Into<String>,
        flow_name: impl Into<String>,
        flow_execution_id: i64,
    ) -> Self {
        Self {
            flow_group: flow_group.into(),
            flow_name: flow_name.into(),
            flow_execution_id,
        }
    }

    /// Reference to one job of this flow execution.
    pub fn node(&self, job_name: impl Into<JobName>) -> DagNodeId {
        DagNodeId {
            dag_id: self.clone(),
            job_name: job_name.into(),
        }
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.flow_group, self.flow_name, self.flow_execution_id
        )
    }
}

/// Names one job of one flow execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DagNodeId {
    pub dag_id: DagId,
    pub job_name: JobName,
}

impl fmt::Display for DagNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dag_id, self.job_name)
    }
}

/// The compiled, executor-agnostic description of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: JobName,
    /// What the executor should run. For the local process executor this is a
    /// shell command line.
    pub command: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// One job's compiled spec plus where and as whom it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionPlan {
    pub dag_id: DagId,
    pub job: JobSpec,
    /// Key into the [`ExecutorRegistry`](crate::exec::ExecutorRegistry).
    pub executor: String,
    pub proxy_user: String,
    pub failure_option: FailureOption,
}

impl JobExecutionPlan {
    pub fn node_id(&self) -> DagNodeId {
        self.dag_id.node(self.job.name.clone())
    }
}

/// A job inside a Dag: its plan, its current status, and the names of the
/// jobs it waits for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub plan: JobExecutionPlan,
    pub status: ExecutionStatus,
    pub dependencies: Vec<JobName>,
}

impl DagNode {
    pub fn new(plan: JobExecutionPlan, dependencies: Vec<JobName>) -> Self {
        Self {
            plan,
            status: ExecutionStatus::Pending,
            dependencies,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.plan.job.name
    }

    pub fn node_id(&self) -> DagNodeId {
        self.plan.node_id()
    }

    pub fn is_start_node(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Copy of this node carrying a different status, ready to be persisted.
    pub fn with_status(&self, status: ExecutionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Why a Dag stopped launching new jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowFailure {
    /// A job failed under `FinishRunning` or `Cancel`.
    JobFailed,
    /// The flow ran past its configured maximum duration.
    DeadlineExceeded,
    /// An explicit KILL action.
    Killed,
}
