// src/dag/graph.rs

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::dag::model::{DagId, DagNode, FlowFailure, JobName};
use crate::errors::{FlowdagError, Result};
use crate::types::{ExecutionStatus, FailureOption};

/// One flow execution: an ordered list of nodes plus the dependency edges
/// implied by each node's `dependencies`.
///
/// Construction through [`Dag::new`] guarantees:
/// - at least one node
/// - unique job names
/// - every dependency names a node of the same Dag
/// - no cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dag {
    id: DagId,
    nodes: Vec<DagNode>,
    launched_at: SystemTime,
    max_duration: Option<Duration>,
    failure: Option<FlowFailure>,
    /// Bumped by the state store on every applied mutation.
    version: u64,
}

impl Dag {
    pub fn new(id: DagId, nodes: Vec<DagNode>) -> Result<Self> {
        validate_nodes(&id, &nodes)?;
        Ok(Self {
            id,
            nodes,
            launched_at: SystemTime::now(),
            max_duration: None,
            failure: None,
            version: 0,
        })
    }

    /// Bound the total runtime of this flow execution.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Override the launch instant (used when rebuilding a Dag that was
    /// launched earlier).
    pub fn with_launched_at(mut self, launched_at: SystemTime) -> Self {
        self.launched_at = launched_at;
        self
    }

    pub fn id(&self) -> &DagId {
        &self.id
    }

    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn node(&self, job: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.job_name() == job)
    }

    pub(crate) fn node_mut(&mut self, job: &str) -> Option<&mut DagNode> {
        self.nodes.iter_mut().find(|n| n.job_name() == job)
    }

    pub fn launched_at(&self) -> SystemTime {
        self.launched_at
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    pub fn failure(&self) -> Option<FlowFailure> {
        self.failure
    }

    pub(crate) fn set_failure(&mut self, failure: FlowFailure) -> bool {
        if self.failure.is_some() {
            return false;
        }
        self.failure = Some(failure);
        true
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    /// Flow-level failure policy. All plans of one flow share it.
    pub fn failure_option(&self) -> FailureOption {
        self.nodes
            .first()
            .map(|n| n.plan.failure_option)
            .unwrap_or_default()
    }

    /// Nodes without dependencies.
    pub fn start_nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.nodes.iter().filter(|n| n.is_start_node())
    }

    /// Immediate dependents of a job (jobs that list it as a dependency).
    pub fn dependents_of(&self, job: &str) -> Vec<&DagNode> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.iter().any(|d| d == job))
            .collect()
    }

    /// All transitive dependents of a job, excluding the job itself.
    pub fn descendants_of(&self, job: &str) -> Vec<JobName> {
        let mut stack: Vec<JobName> = self
            .dependents_of(job)
            .into_iter()
            .map(|n| n.job_name().to_string())
            .collect();
        let mut visited: HashSet<JobName> = HashSet::new();
        let mut out = Vec::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            stack.extend(
                self.dependents_of(&name)
                    .into_iter()
                    .map(|n| n.job_name().to_string()),
            );
            out.push(name);
        }

        out
    }

    /// Whether every dependency of `node` has completed successfully.
    pub fn deps_satisfied(&self, node: &DagNode) -> bool {
        node.dependencies.iter().all(|dep| {
            self.node(dep)
                .is_some_and(|d| d.status == ExecutionStatus::Complete)
        })
    }

    /// PENDING nodes whose dependencies are all COMPLETE.
    ///
    /// A Dag with a recorded [`FlowFailure`] has no ready nodes: it only
    /// winds down.
    pub fn ready_nodes(&self) -> Vec<&DagNode> {
        if self.failure.is_some() {
            return Vec::new();
        }
        self.nodes
            .iter()
            .filter(|n| n.status == ExecutionStatus::Pending && self.deps_satisfied(n))
            .collect()
    }

    pub fn has_running_jobs(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.status == ExecutionStatus::Running)
    }

    /// No node is PENDING or RUNNING.
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    /// Names of nodes in the given status, in Dag order.
    pub fn jobs_in(&self, status: ExecutionStatus) -> Vec<JobName> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.job_name().to_string())
            .collect()
    }
}

fn validate_nodes(id: &DagId, nodes: &[DagNode]) -> Result<()> {
    if nodes.is_empty() {
        return Err(FlowdagError::InvalidDag(format!(
            "dag '{id}' must contain at least one job"
        )));
    }

    let mut names: HashSet<&str> = HashSet::new();
    for node in nodes {
        if !names.insert(node.job_name()) {
            return Err(FlowdagError::InvalidDag(format!(
                "dag '{id}' has duplicate job '{}'",
                node.job_name()
            )));
        }
        if &node.plan.dag_id != id {
            return Err(FlowdagError::InvalidDag(format!(
                "job '{}' belongs to '{}', not '{id}'",
                node.job_name(),
                node.plan.dag_id
            )));
        }
    }

    for node in nodes {
        for dep in &node.dependencies {
            if dep == node.job_name() {
                return Err(FlowdagError::InvalidDag(format!(
                    "job '{}' cannot depend on itself",
                    dep
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(FlowdagError::InvalidDag(format!(
                    "job '{}' has unknown dependency '{}'",
                    node.job_name(),
                    dep
                )));
            }
        }
    }

    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for node in nodes {
        graph.add_node(node.job_name());
    }
    for node in nodes {
        for dep in &node.dependencies {
            graph.add_edge(dep.as_str(), node.job_name(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FlowdagError::DagCycle(format!(
            "cycle detected in dag '{id}' involving job '{}'",
            cycle.node_id()
        ))),
    }
}
