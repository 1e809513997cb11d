// src/proc/kill.rs

use tracing::{debug, info};

use crate::action::DagAction;
use crate::dag::FlowFailure;
use crate::engine::FlowOutcome;
use crate::errors::Result;
use crate::proc::common::{cancel_pending, cancel_running, finalize};
use crate::proc::{ProcContext, ProcOutcome};
use crate::store::DagStateStore;
use crate::types::ExecutionStatus;

/// Stop a flow regardless of its FailureOption.
pub(super) async fn process(
    action: &DagAction,
    store: &dyn DagStateStore,
    ctx: &ProcContext,
) -> Result<ProcOutcome> {
    let dag_id = action.dag_id();
    let Some(dag) = store.get_dag(&dag_id)? else {
        let dropped = store.delete_dag_actions(&dag_id)?;
        store.forget_job_statuses(&dag_id)?;
        debug!(dag = %dag_id, dropped, "kill for dag that is not live");
        return Ok(ProcOutcome::Done);
    };

    info!(dag = %dag_id, "killing flow");
    store.fail_dag(&dag_id, FlowFailure::Killed)?;
    cancel_running(store, ctx, &dag, &dag.jobs_in(ExecutionStatus::Running)).await?;
    cancel_pending(store, &dag, &dag.jobs_in(ExecutionStatus::Pending))?;

    if let Some(dag) = store.get_dag(&dag_id)? {
        finalize(store, ctx, &dag, FlowOutcome::Killed)?;
    }
    Ok(ProcOutcome::Done)
}
