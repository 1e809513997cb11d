// src/proc/reevaluate.rs

//! REEVALUATE: react to a job's latest status, or launch a deferred job.

use tracing::{debug, info, warn};

use crate::action::{DagAction, DagActionType};
use crate::dag::{Dag, DagId, DagNode, FlowFailure, NextStep, failure_plan, next_step};
use crate::engine::FlowOutcome;
use crate::errors::Result;
use crate::proc::common::{
    LaunchResult, cancel_pending, cancel_running, finalize, launch_node, outcome_of,
};
use crate::proc::{ProcContext, ProcOutcome};
use crate::store::{DagStateStore, JobStatus, NodeStateChange};
use crate::types::ExecutionStatus;

pub(super) async fn process(
    action: &DagAction,
    store: &dyn DagStateStore,
    ctx: &ProcContext,
) -> Result<ProcOutcome> {
    let Some(node_id) = action.node_id() else {
        warn!(action = %action, "REEVALUATE without a job name; dropping");
        return Ok(ProcOutcome::Done);
    };
    let dag_id = &node_id.dag_id;

    let (node, latest) = store.get_dag_node_with_job_status(&node_id)?;
    let Some(node) = node else {
        debug!(job = %node_id, "node no longer exists; nothing to reevaluate");
        if store.get_dag(dag_id)?.is_none() {
            // A report that arrived after the Dag finished.
            store.forget_job_statuses(dag_id)?;
        }
        return Ok(ProcOutcome::Done);
    };

    if is_launch_request(&node, latest.as_ref()) {
        return launch_deferred(store, ctx, dag_id, &node).await;
    }

    let mut status = node.status;
    if let Some(latest) = &latest {
        if node.status.can_transition_to(latest.status) {
            match store.add_dag_node_state(&node.with_status(latest.status), dag_id)? {
                NodeStateChange::Applied => {
                    status = latest.status;
                    log_reported(&node, latest);
                }
                NodeStateChange::Stale => {}
                NodeStateChange::Missing => return Ok(ProcOutcome::Done),
            }
        }
    }

    if !status.is_terminal() {
        debug!(job = %node_id, %status, "job still in flight");
        return Ok(ProcOutcome::Done);
    }

    let Some(dag) = store.get_dag(dag_id)? else {
        return Ok(ProcOutcome::Done);
    };

    if status == ExecutionStatus::Failed {
        let plan = failure_plan(&dag, &node_id.job_name);
        info!(
            job = %node_id,
            option = ?dag.failure_option(),
            halt = plan.halt,
            cancel_running = plan.cancel_running.len(),
            cancel_pending = plan.cancel_pending.len(),
            "applying failure option"
        );
        if plan.halt {
            store.fail_dag(dag_id, FlowFailure::JobFailed)?;
        }
        cancel_running(store, ctx, &dag, &plan.cancel_running).await?;
        cancel_pending(store, &dag, &plan.cancel_pending)?;
    }

    let Some(dag) = store.get_dag(dag_id)? else {
        return Ok(ProcOutcome::Done);
    };
    advance(store, ctx, &dag).await?;
    Ok(ProcOutcome::Done)
}

/// A PENDING node that nobody has reported on is waiting to be launched.
fn is_launch_request(node: &DagNode, latest: Option<&JobStatus>) -> bool {
    node.status == ExecutionStatus::Pending
        && latest.is_none_or(|s| s.status == ExecutionStatus::Pending)
}

async fn launch_deferred(
    store: &dyn DagStateStore,
    ctx: &ProcContext,
    dag_id: &DagId,
    node: &DagNode,
) -> Result<ProcOutcome> {
    let Some(dag) = store.get_dag(dag_id)? else {
        return Ok(ProcOutcome::Done);
    };
    if dag.failure().is_some() || !dag.deps_satisfied(node) {
        debug!(job = %node.node_id(), "node not ready; deferred launch skipped");
        return Ok(ProcOutcome::Done);
    }

    match launch_node(store, ctx, node).await? {
        LaunchResult::Submitted => {
            if node.is_start_node() {
                store.add_flow_dag_action(dag_id, DagActionType::EnforceFlowFinishDeadline)?;
            }
            Ok(ProcOutcome::Done)
        }
        LaunchResult::QuotaDenied => Ok(ProcOutcome::Retry {
            after: ctx.options.quota_retry_delay,
        }),
        LaunchResult::AlreadyClaimed | LaunchResult::DispatchFailed | LaunchResult::Missing => {
            Ok(ProcOutcome::Done)
        }
    }
}

/// Launch, fan out, finish, or wait, depending on what became ready.
async fn advance(store: &dyn DagStateStore, ctx: &ProcContext, dag: &Dag) -> Result<()> {
    match next_step(dag) {
        NextStep::LaunchOne(job) => {
            let Some(node) = dag.node(&job) else {
                return Ok(());
            };
            debug!(job = %node.node_id(), "single ready job; launching in place");
            if launch_node(store, ctx, node).await? == LaunchResult::QuotaDenied {
                store.add_job_dag_action(&node.node_id(), DagActionType::Reevaluate)?;
            }
        }
        NextStep::FanOut(jobs) => {
            info!(dag = %dag.id(), ready = ?jobs, "fanning out ready jobs");
            for job in jobs {
                store.add_job_dag_action(&dag.id().node(job), DagActionType::Reevaluate)?;
            }
        }
        NextStep::Finished => {
            let outcome = match dag.failure() {
                Some(FlowFailure::DeadlineExceeded) => FlowOutcome::TimedOut,
                Some(FlowFailure::Killed) => FlowOutcome::Killed,
                Some(FlowFailure::JobFailed) | None => outcome_of(dag),
            };
            finalize(store, ctx, dag, outcome)?;
        }
        NextStep::Wait => {
            debug!(dag = %dag.id(), "waiting on other jobs");
        }
    }
    Ok(())
}

fn log_reported(node: &DagNode, latest: &JobStatus) {
    match (latest.status, latest.message.as_deref()) {
        (ExecutionStatus::Failed, message) => {
            warn!(job = %node.node_id(), message = message.unwrap_or(""), "job failed")
        }
        (status, _) => info!(job = %node.node_id(), %status, "job status applied"),
    }
}
