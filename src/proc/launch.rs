// src/proc/launch.rs

use tracing::{info, warn};

use crate::action::{DagAction, DagActionType};
use crate::dag::DagId;
use crate::engine::{FlowEvent, FlowOutcome};
use crate::errors::{FlowdagError, Result};
use crate::proc::common::{LaunchResult, launch_node, publish};
use crate::proc::{ProcContext, ProcOutcome};
use crate::store::DagStateStore;

/// Compile the flow, persist the Dag, then launch every start node.
///
/// A start node that is denied quota stays PENDING and gets its own
/// REEVALUATE, which retries the launch later.
pub(super) async fn process(
    action: &DagAction,
    store: &dyn DagStateStore,
    ctx: &ProcContext,
) -> Result<ProcOutcome> {
    let dag_id = action.dag_id();

    if store.get_dag(&dag_id)?.is_some() {
        info!(dag = %dag_id, "dag already live; duplicate launch ignored");
        return Ok(ProcOutcome::Done);
    }

    let dag = match ctx.compiler.compile(action)? {
        Some(dag) if dag.id() == &dag_id => dag,
        Some(dag) => {
            warn!(dag = %dag_id, compiled = %dag.id(), "compiler returned a dag for another flow");
            return compilation_failed(ctx, dag_id);
        }
        None => return compilation_failed(ctx, dag_id),
    };

    match store.add_dag(&dag) {
        Ok(()) => {}
        Err(FlowdagError::DuplicateDag(id)) => {
            info!(dag = %id, "dag stored concurrently; duplicate launch ignored");
            return Ok(ProcOutcome::Done);
        }
        Err(err) => return Err(err),
    }

    for node in dag.start_nodes() {
        match launch_node(store, ctx, node).await? {
            LaunchResult::Submitted => {
                store.add_flow_dag_action(&dag_id, DagActionType::EnforceFlowFinishDeadline)?;
            }
            LaunchResult::QuotaDenied => {
                store.add_job_dag_action(&node.node_id(), DagActionType::Reevaluate)?;
            }
            LaunchResult::AlreadyClaimed
            | LaunchResult::DispatchFailed
            | LaunchResult::Missing => {}
        }
    }

    Ok(ProcOutcome::Done)
}

fn compilation_failed(ctx: &ProcContext, dag_id: DagId) -> Result<ProcOutcome> {
    warn!(dag = %dag_id, "flow compilation failed; launch abandoned");
    publish(
        ctx,
        FlowEvent {
            dag_id,
            outcome: FlowOutcome::CompilationFailed,
        },
    );
    Ok(ProcOutcome::Done)
}
