// src/proc/deadline.rs

use std::time::SystemTime;

use tracing::{debug, warn};

use crate::action::DagAction;
use crate::dag::FlowFailure;
use crate::engine::FlowOutcome;
use crate::errors::Result;
use crate::proc::common::{cancel_pending, cancel_running, finalize};
use crate::proc::{ProcContext, ProcOutcome};
use crate::store::DagStateStore;
use crate::types::ExecutionStatus;

/// Time a flow out once it has run longer than its `max_duration`.
///
/// Before the deadline nothing changes; the action is kept and comes back
/// when the remaining time has passed.
pub(super) async fn process(
    action: &DagAction,
    store: &dyn DagStateStore,
    ctx: &ProcContext,
) -> Result<ProcOutcome> {
    let dag_id = action.dag_id();
    let Some(dag) = store.get_dag(&dag_id)? else {
        debug!(dag = %dag_id, "deadline check for finished dag");
        return Ok(ProcOutcome::Done);
    };
    let Some(max_duration) = dag.max_duration() else {
        return Ok(ProcOutcome::Done);
    };

    let elapsed = SystemTime::now()
        .duration_since(dag.launched_at())
        .unwrap_or_default();
    if elapsed < max_duration {
        let remaining = max_duration - elapsed;
        debug!(dag = %dag_id, ?remaining, "deadline not reached yet");
        return Ok(ProcOutcome::Retry { after: remaining });
    }

    warn!(dag = %dag_id, ?elapsed, ?max_duration, "flow exceeded its deadline; cancelling");
    store.fail_dag(&dag_id, FlowFailure::DeadlineExceeded)?;
    cancel_running(store, ctx, &dag, &dag.jobs_in(ExecutionStatus::Running)).await?;
    cancel_pending(store, &dag, &dag.jobs_in(ExecutionStatus::Pending))?;

    if let Some(dag) = store.get_dag(&dag_id)? {
        finalize(store, ctx, &dag, FlowOutcome::TimedOut)?;
    }
    Ok(ProcOutcome::Done)
}
