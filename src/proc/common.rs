// src/proc/common.rs

//! Steps shared by several processors.

use std::slice;

use tracing::{debug, error, info, warn};

use crate::action::DagActionType;
use crate::dag::{Dag, DagNode, JobExecutionPlan, JobName};
use crate::engine::{FlowEvent, FlowOutcome};
use crate::errors::Result;
use crate::proc::ProcContext;
use crate::store::{DagStateStore, NodeStateChange, QuotaDecision};
use crate::types::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LaunchResult {
    Submitted,
    QuotaDenied,
    /// Someone else already moved the node past PENDING.
    AlreadyClaimed,
    /// Every submit attempt failed; the node is FAILED and a REEVALUATE for
    /// it is queued.
    DispatchFailed,
    /// The Dag disappeared underneath us.
    Missing,
}

/// Quota, claim, submit: the only path by which a job reaches an executor.
///
/// The node is persisted as RUNNING before the executor sees it, so a second
/// invocation for the same node finds the claim already taken and submits
/// nothing.
pub(crate) async fn launch_node(
    store: &dyn DagStateStore,
    ctx: &ProcContext,
    node: &DagNode,
) -> Result<LaunchResult> {
    let dag_id = &node.plan.dag_id;
    let node_id = node.node_id();

    if let QuotaDecision::Denied { reason } = store.try_acquire_quota(slice::from_ref(node))? {
        info!(job = %node_id, %reason, "quota denied; launch deferred");
        return Ok(LaunchResult::QuotaDenied);
    }

    match store.add_dag_node_state(&node.with_status(ExecutionStatus::Running), dag_id)? {
        NodeStateChange::Applied => {}
        NodeStateChange::Stale => {
            debug!(job = %node_id, "node already claimed; not submitting");
            let (stored, _) = store.get_dag_node_with_job_status(&node_id)?;
            if stored.is_some_and(|n| n.status.is_terminal()) {
                store.release_quota(node)?;
            }
            return Ok(LaunchResult::AlreadyClaimed);
        }
        NodeStateChange::Missing => {
            store.release_quota(node)?;
            return Ok(LaunchResult::Missing);
        }
    }

    match submit_with_retries(ctx, &node.plan).await {
        Ok(()) => {
            info!(job = %node_id, executor = %node.plan.executor, "job submitted");
            Ok(LaunchResult::Submitted)
        }
        Err(err) => {
            error!(job = %node_id, error = %err, "job dispatch failed; marking FAILED");
            store.add_dag_node_state(&node.with_status(ExecutionStatus::Failed), dag_id)?;
            store.add_job_dag_action(&node_id, DagActionType::Reevaluate)?;
            Ok(LaunchResult::DispatchFailed)
        }
    }
}

async fn submit_with_retries(ctx: &ProcContext, plan: &JobExecutionPlan) -> Result<()> {
    let executor = ctx.executors.get(&plan.executor)?;
    let attempts = ctx.options.max_dispatch_attempts.max(1);

    let mut attempt = 1;
    loop {
        match executor.submit(plan.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < attempts => {
                warn!(
                    job = %plan.node_id(),
                    attempt,
                    attempts,
                    error = %err,
                    "submit failed; retrying"
                );
                tokio::time::sleep(ctx.options.dispatch_retry_backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Ask executors to stop the given RUNNING jobs and mark them CANCELLED.
///
/// A failed executor cancel is logged, not propagated: the node is still
/// marked CANCELLED so the Dag can wind down.
pub(crate) async fn cancel_running(
    store: &dyn DagStateStore,
    ctx: &ProcContext,
    dag: &Dag,
    jobs: &[JobName],
) -> Result<()> {
    for job in jobs {
        let Some(node) = dag.node(job) else {
            continue;
        };
        let cancelled = match ctx.executors.get(&node.plan.executor) {
            Ok(executor) => executor.cancel(node.plan.clone()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = cancelled {
            warn!(job = %node.node_id(), error = %err, "executor cancel failed");
        }
        store.add_dag_node_state(&node.with_status(ExecutionStatus::Cancelled), dag.id())?;
        info!(job = %node.node_id(), "running job cancelled");
    }
    Ok(())
}

/// Mark PENDING jobs CANCELLED; they will never run.
pub(crate) fn cancel_pending(store: &dyn DagStateStore, dag: &Dag, jobs: &[JobName]) -> Result<()> {
    for job in jobs {
        if let Some(node) = dag.node(job) {
            store.add_dag_node_state(&node.with_status(ExecutionStatus::Cancelled), dag.id())?;
            debug!(job = %node.node_id(), "pending job cancelled");
        }
    }
    Ok(())
}

/// Outcome of a Dag that finished on its own.
pub(crate) fn outcome_of(dag: &Dag) -> FlowOutcome {
    let failed_jobs = dag.jobs_in(ExecutionStatus::Failed);
    if failed_jobs.is_empty() {
        FlowOutcome::Succeeded
    } else {
        FlowOutcome::Failed { failed_jobs }
    }
}

/// Remove the Dag and everything still queued for it, then announce the
/// outcome.
pub(crate) fn finalize(
    store: &dyn DagStateStore,
    ctx: &ProcContext,
    dag: &Dag,
    outcome: FlowOutcome,
) -> Result<()> {
    let actions = store.delete_dag_actions(dag.id())?;
    if !store.delete_dag(dag.id())? {
        debug!(dag = %dag.id(), "dag already deleted; not announcing again");
        return Ok(());
    }
    info!(dag = %dag.id(), ?outcome, actions, "flow finished");
    publish(ctx, FlowEvent {
        dag_id: dag.id().clone(),
        outcome,
    });
    Ok(())
}

pub(crate) fn publish(ctx: &ProcContext, event: FlowEvent) {
    // Nobody listening is fine.
    let _ = ctx.events.send(event);
}
