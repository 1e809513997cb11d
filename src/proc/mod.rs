// src/proc/mod.rs

//! DagProc state machine: one processor per [`DagActionType`].
//!
//! Every processor runs inside the per-Dag critical section handed out by the
//! state store, checks that its Dag still exists before mutating it, and
//! treats "already done" as success. That makes redelivered and duplicated
//! actions safe to process again.

mod common;
mod deadline;
mod kill;
mod launch;
mod reevaluate;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use crate::action::{DagAction, DagActionType};
use crate::compiler::FlowCompiler;
use crate::engine::{DagTask, EngineOptions, FlowEvent};
use crate::errors::Result;
use crate::exec::ExecutorRegistry;

/// Collaborators shared by all processors of one engine.
#[derive(Clone)]
pub struct ProcContext {
    pub compiler: Arc<dyn FlowCompiler>,
    pub executors: ExecutorRegistry,
    pub events: broadcast::Sender<FlowEvent>,
    pub options: EngineOptions,
}

/// What should happen to the processed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcOutcome {
    /// Fully handled; the action has been deleted from the log.
    Done,
    /// Keep it in the log and process it again after `after`.
    Retry { after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagProc {
    Launch,
    Reevaluate,
    EnforceFlowFinishDeadline,
    Kill,
}

impl DagProc {
    pub fn for_action(action: &DagAction) -> Self {
        match action.action_type {
            DagActionType::Launch => DagProc::Launch,
            DagActionType::Reevaluate => DagProc::Reevaluate,
            DagActionType::EnforceFlowFinishDeadline => DagProc::EnforceFlowFinishDeadline,
            DagActionType::Kill => DagProc::Kill,
        }
    }

    /// Run the processor inside the Dag's critical section.
    ///
    /// A `Done` action is deleted from the log before the critical section is
    /// released. A LAUNCH that is no longer in the log was already consumed
    /// by an earlier delivery and is skipped.
    pub async fn process(self, task: &DagTask, ctx: &ProcContext) -> Result<ProcOutcome> {
        let dag_id = task.action.dag_id();
        let lock = task.store.critical_section(&dag_id)?;
        let _guard = lock.lock().await;
        debug!(action = %task.action, proc = ?self, "processing action");

        let store = task.store.as_ref();
        if self == DagProc::Launch && !store.dag_action_exists(&task.action)? {
            debug!(action = %task.action, "launch already consumed; skipping");
            return Ok(ProcOutcome::Done);
        }

        let outcome = match self {
            DagProc::Launch => launch::process(&task.action, store, ctx).await?,
            DagProc::Reevaluate => reevaluate::process(&task.action, store, ctx).await?,
            DagProc::EnforceFlowFinishDeadline => {
                deadline::process(&task.action, store, ctx).await?
            }
            DagProc::Kill => kill::process(&task.action, store, ctx).await?,
        };

        if outcome == ProcOutcome::Done {
            store.delete_dag_action(&task.action)?;
        }
        Ok(outcome)
    }
}
