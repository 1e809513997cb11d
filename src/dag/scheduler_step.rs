// src/dag/scheduler_step.rs

//! Pure decisions taken after a node reaches a terminal state.
//!
//! These functions look at a Dag snapshot and say what should happen next;
//! the processors in [`crate::proc`] carry the decision out against the
//! state store and the executors.

use crate::dag::graph::Dag;
use crate::dag::model::JobName;
use crate::types::{ExecutionStatus, FailureOption};

/// What a Dag needs after one of its nodes finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Exactly one node became ready: launch it in place.
    LaunchOne(JobName),
    /// Several nodes became ready at once: hand each one to its own
    /// REEVALUATE action.
    FanOut(Vec<JobName>),
    /// Nothing is pending or running any more.
    Finished,
    /// Other branches are still in flight.
    Wait,
}

pub fn next_step(dag: &Dag) -> NextStep {
    if dag.is_finished() {
        return NextStep::Finished;
    }

    let mut ready: Vec<JobName> = dag
        .ready_nodes()
        .into_iter()
        .map(|n| n.job_name().to_string())
        .collect();

    match ready.len() {
        0 => NextStep::Wait,
        1 => match ready.pop() {
            Some(name) => NextStep::LaunchOne(name),
            None => NextStep::Wait,
        },
        _ => NextStep::FanOut(ready),
    }
}

/// Consequences of a FAILED node under the Dag's [`FailureOption`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePlan {
    /// The Dag stops launching anything new.
    pub halt: bool,
    /// RUNNING jobs whose executor submissions must be cancelled.
    pub cancel_running: Vec<JobName>,
    /// PENDING jobs that will never run.
    pub cancel_pending: Vec<JobName>,
}

pub fn failure_plan(dag: &Dag, failed_job: &str) -> FailurePlan {
    match dag.failure_option() {
        FailureOption::FinishAllPossible => {
            let cancel_pending = dag
                .descendants_of(failed_job)
                .into_iter()
                .filter(|name| {
                    dag.node(name)
                        .is_some_and(|n| n.status == ExecutionStatus::Pending)
                })
                .collect();
            FailurePlan {
                halt: false,
                cancel_running: Vec::new(),
                cancel_pending,
            }
        }
        FailureOption::FinishRunning => FailurePlan {
            halt: true,
            cancel_running: Vec::new(),
            cancel_pending: dag.jobs_in(ExecutionStatus::Pending),
        },
        FailureOption::Cancel => FailurePlan {
            halt: true,
            cancel_running: dag.jobs_in(ExecutionStatus::Running),
            cancel_pending: dag.jobs_in(ExecutionStatus::Pending),
        },
    }
}
