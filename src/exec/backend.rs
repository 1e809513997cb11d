// src/exec/backend.rs

//! Pluggable job executor abstraction.
//!
//! Processors talk to a [`JobExecutor`] looked up by name in an
//! [`ExecutorRegistry`]. Production wires [`ProcessExecutor`] under the name
//! `"local"`; tests register recording fakes instead.
//!
//! [`ProcessExecutor`]: crate::exec::ProcessExecutor

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::{ActionLog, DagAction, DagActionType};
use crate::dag::{DagNodeId, JobExecutionPlan};
use crate::errors::{FlowdagError, Result};
use crate::store::{InMemoryStatusFeed, JobStatus};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport to a runtime that actually runs jobs.
///
/// `submit` only has to hand the job over; completion is reported out of
/// band through the status feed.
pub trait JobExecutor: Send + Sync {
    fn submit(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>>;

    fn cancel(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>>;
}

/// Executors by name.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, executor: Arc<dyn JobExecutor>) -> Self {
        self.register(name, executor);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn JobExecutor>> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| FlowdagError::UnknownExecutor(name.to_string()))
    }
}

/// Reports a finished job the way an external job-status monitor would:
/// record the status, then ask for the job to be reevaluated.
///
/// The REEVALUATE is added, or re-announced if one is already in the log (it
/// may be the very action whose processing submitted the job), so the new
/// status is picked up even after that processing deletes it.
#[derive(Clone)]
pub struct CompletionReporter {
    statuses: Arc<InMemoryStatusFeed>,
    actions: Arc<dyn ActionLog>,
}

impl CompletionReporter {
    pub fn new(statuses: Arc<InMemoryStatusFeed>, actions: Arc<dyn ActionLog>) -> Self {
        Self { statuses, actions }
    }

    pub fn report(&self, node_id: &DagNodeId, status: JobStatus) {
        if let Err(err) = self.statuses.report(node_id.clone(), status) {
            warn!(job = %node_id, error = %err, "failed to record job status");
            return;
        }
        let action = DagAction::job(node_id, DagActionType::Reevaluate);
        match self.actions.add_or_touch(&action) {
            Ok(kind) => debug!(job = %node_id, ?kind, "reevaluation requested"),
            Err(err) => warn!(job = %node_id, error = %err, "failed to request reevaluation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    use crate::action::{ActionChange, ChangeKind, InMemoryActionLog};
    use crate::dag::DagId;
    use crate::store::StatusFeed;
    use crate::types::ExecutionStatus;

    /// Deletes an action whenever it is added twice, as if the worker that
    /// processed it finished right between a failed `add` and the `touch`.
    #[derive(Default)]
    struct DeleteOnDuplicate {
        inner: InMemoryActionLog,
    }

    impl ActionLog for DeleteOnDuplicate {
        fn add(&self, action: &DagAction) -> Result<bool> {
            if self.inner.add(action)? {
                return Ok(true);
            }
            self.inner.delete(action)?;
            Ok(false)
        }

        fn delete(&self, action: &DagAction) -> Result<bool> {
            self.inner.delete(action)
        }

        fn exists(&self, action: &DagAction) -> Result<bool> {
            self.inner.exists(action)
        }

        fn touch(&self, action: &DagAction) -> Result<bool> {
            self.inner.touch(action)
        }

        fn pending(&self) -> Result<Vec<DagAction>> {
            self.inner.pending()
        }

        fn actions_for(&self, dag_id: &DagId) -> Result<Vec<DagAction>> {
            self.inner.actions_for(dag_id)
        }

        fn subscribe(&self) -> broadcast::Receiver<ActionChange> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn report_survives_reevaluation_deleted_mid_request() {
        let statuses = Arc::new(InMemoryStatusFeed::new());
        let log = Arc::new(DeleteOnDuplicate::default());
        let node_id = DagId::new("g", "f", 1).node("a");
        let action = DagAction::job(&node_id, DagActionType::Reevaluate);
        log.add(&action).unwrap();
        let mut rx = log.subscribe();

        let reporter = CompletionReporter::new(statuses.clone(), log.clone());
        reporter.report(&node_id, JobStatus::new(ExecutionStatus::Complete));

        assert!(log.exists(&action).unwrap(), "completion must stay requested");
        assert_eq!(
            statuses.latest_status(&node_id).unwrap().map(|s| s.status),
            Some(ExecutionStatus::Complete)
        );
        let kinds: Vec<ChangeKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|change| change.kind)
            .collect();
        assert_eq!(kinds, vec![ChangeKind::Delete, ChangeKind::Insert]);
    }

    #[test]
    fn report_reannounces_a_pending_reevaluation() {
        let statuses = Arc::new(InMemoryStatusFeed::new());
        let log = Arc::new(InMemoryActionLog::new());
        let node_id = DagId::new("g", "f", 2).node("a");
        let action = DagAction::job(&node_id, DagActionType::Reevaluate);
        log.add(&action).unwrap();
        let mut rx = log.subscribe();

        CompletionReporter::new(statuses, log.clone())
            .report(&node_id, JobStatus::new(ExecutionStatus::Failed));

        assert_eq!(log.pending().unwrap(), vec![action]);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Update);
    }
}
