// src/action/model.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dag::{DagId, DagNodeId, JobName};

/// Orchestration operation requested by a [`DagAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DagActionType {
    Launch,
    Reevaluate,
    Kill,
    EnforceFlowFinishDeadline,
}

impl fmt::Display for DagActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DagActionType::Launch => "LAUNCH",
            DagActionType::Reevaluate => "REEVALUATE",
            DagActionType::Kill => "KILL",
            DagActionType::EnforceFlowFinishDeadline => "ENFORCE_FLOW_FINISH_DEADLINE",
        };
        f.write_str(s)
    }
}

/// A typed request to operate on a flow (no job name) or on one job.
///
/// Identity is the whole tuple: two actions with equal fields are the same
/// logical action, and the action log stores it once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagAction {
    pub flow_group: String,
    pub flow_name: String,
    pub flow_execution_id: i64,
    pub job_name: Option<JobName>,
    pub action_type: DagActionType,
}

impl DagAction {
    /// Flow-level action (no job name).
    pub fn flow(dag_id: &DagId, action_type: DagActionType) -> Self {
        Self {
            flow_group: dag_id.flow_group.clone(),
            flow_name: dag_id.flow_name.clone(),
            flow_execution_id: dag_id.flow_execution_id,
            job_name: None,
            action_type,
        }
    }

    /// Job-level action.
    pub fn job(node_id: &DagNodeId, action_type: DagActionType) -> Self {
        Self {
            job_name: Some(node_id.job_name.clone()),
            ..Self::flow(&node_id.dag_id, action_type)
        }
    }

    pub fn dag_id(&self) -> DagId {
        DagId::new(
            self.flow_group.clone(),
            self.flow_name.clone(),
            self.flow_execution_id,
        )
    }

    /// The targeted job, for job-level actions.
    pub fn node_id(&self) -> Option<DagNodeId> {
        self.job_name.as_ref().map(|job| self.dag_id().node(job.clone()))
    }

    pub fn belongs_to(&self, dag_id: &DagId) -> bool {
        self.flow_group == dag_id.flow_group
            && self.flow_name == dag_id.flow_name
            && self.flow_execution_id == dag_id.flow_execution_id
    }
}

impl fmt::Display for DagAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.action_type, self.flow_group, self.flow_name, self.flow_execution_id
        )?;
        if let Some(job) = &self.job_name {
            write!(f, "/{job}")?;
        }
        Ok(())
    }
}
