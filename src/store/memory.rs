// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::action::{ActionLog, DagAction, DagActionType};
use crate::dag::{Dag, DagId, DagNode, DagNodeId, FlowFailure};
use crate::errors::{FlowdagError, Result};
use crate::store::quota::{QuotaDecision, QuotaGate, QuotaLimits};
use crate::store::status::{JobStatus, StatusFeed};
use crate::store::{DagStateStore, NodeStateChange};

/// Lock entries are pruned once the map grows past this many Dags.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
struct StoreState {
    dags: HashMap<DagId, Dag>,
    quota: QuotaGate,
}

/// Process-local [`DagStateStore`].
///
/// Several engines in one process may share a single instance; that is how
/// the multi-replica tests model a shared database.
pub struct InMemoryDagStateStore {
    state: Mutex<StoreState>,
    locks: Mutex<HashMap<DagId, Arc<tokio::sync::Mutex<()>>>>,
    actions: Arc<dyn ActionLog>,
    statuses: Arc<dyn StatusFeed>,
}

impl InMemoryDagStateStore {
    pub fn new(
        actions: Arc<dyn ActionLog>,
        statuses: Arc<dyn StatusFeed>,
        limits: QuotaLimits,
    ) -> Self {
        Self {
            state: Mutex::new(StoreState {
                dags: HashMap::new(),
                quota: QuotaGate::new(limits),
            }),
            locks: Mutex::new(HashMap::new()),
            actions,
            statuses,
        }
    }

    pub fn action_log(&self) -> &Arc<dyn ActionLog> {
        &self.actions
    }

    pub fn running_for_user(&self, user: &str) -> Result<usize> {
        Ok(self.lock_state()?.quota.running_for_user(user))
    }

    pub fn running_for_flow_group(&self, group: &str) -> Result<usize> {
        Ok(self.lock_state()?.quota.running_for_flow_group(group))
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| FlowdagError::poisoned("dag state"))
    }
}

impl DagStateStore for InMemoryDagStateStore {
    fn critical_section(&self, dag_id: &DagId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| FlowdagError::poisoned("dag locks"))?;

        if locks.len() > LOCK_PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Ok(locks
            .entry(dag_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    fn add_dag(&self, dag: &Dag) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.dags.contains_key(dag.id()) {
            return Err(FlowdagError::DuplicateDag(dag.id().clone()));
        }
        info!(dag = %dag.id(), jobs = dag.nodes().len(), "dag stored");
        state.dags.insert(dag.id().clone(), dag.clone());
        Ok(())
    }

    fn get_dag(&self, dag_id: &DagId) -> Result<Option<Dag>> {
        Ok(self.lock_state()?.dags.get(dag_id).cloned())
    }

    fn delete_dag(&self, dag_id: &DagId) -> Result<bool> {
        let removed = {
            let mut state = self.lock_state()?;
            let removed = state.dags.remove(dag_id).is_some();
            let released = state.quota.release_dag(dag_id);
            if removed {
                info!(dag = %dag_id, released, "dag deleted");
            }
            removed
        };
        self.statuses.forget(dag_id)?;
        Ok(removed)
    }

    fn forget_job_statuses(&self, dag_id: &DagId) -> Result<()> {
        self.statuses.forget(dag_id)
    }

    fn get_dag_node_with_job_status(
        &self,
        node_id: &DagNodeId,
    ) -> Result<(Option<DagNode>, Option<JobStatus>)> {
        let node = {
            let state = self.lock_state()?;
            state
                .dags
                .get(&node_id.dag_id)
                .and_then(|dag| dag.node(&node_id.job_name))
                .cloned()
        };
        let status = self.statuses.latest_status(node_id)?;
        Ok((node, status))
    }

    fn add_dag_node_state(&self, node: &DagNode, dag_id: &DagId) -> Result<NodeStateChange> {
        let mut state = self.lock_state()?;
        let StoreState { dags, quota } = &mut *state;

        let Some(dag) = dags.get_mut(dag_id) else {
            debug!(dag = %dag_id, job = node.job_name(), "node write for missing dag");
            return Ok(NodeStateChange::Missing);
        };
        let Some(stored) = dag.node_mut(node.job_name()) else {
            warn!(dag = %dag_id, job = node.job_name(), "node write for unknown job");
            return Ok(NodeStateChange::Missing);
        };

        if !stored.status.can_transition_to(node.status) {
            debug!(
                dag = %dag_id,
                job = node.job_name(),
                stored = %stored.status,
                requested = %node.status,
                "stale node write ignored"
            );
            return Ok(NodeStateChange::Stale);
        }

        stored.status = node.status;
        dag.bump_version();
        if node.status.is_terminal() {
            quota.release(node);
        }
        debug!(dag = %dag_id, job = node.job_name(), status = %node.status, "node state written");
        Ok(NodeStateChange::Applied)
    }

    fn fail_dag(&self, dag_id: &DagId, failure: FlowFailure) -> Result<NodeStateChange> {
        let mut state = self.lock_state()?;
        let Some(dag) = state.dags.get_mut(dag_id) else {
            return Ok(NodeStateChange::Missing);
        };
        if !dag.set_failure(failure) {
            return Ok(NodeStateChange::Stale);
        }
        dag.bump_version();
        info!(dag = %dag_id, ?failure, "dag marked failed");
        Ok(NodeStateChange::Applied)
    }

    fn has_running_jobs(&self, dag_id: &DagId) -> Result<bool> {
        let state = self.lock_state()?;
        Ok(state
            .dags
            .get(dag_id)
            .is_some_and(|dag| dag.has_running_jobs()))
    }

    fn add_flow_dag_action(&self, dag_id: &DagId, action_type: DagActionType) -> Result<bool> {
        self.actions.add(&DagAction::flow(dag_id, action_type))
    }

    fn add_job_dag_action(
        &self,
        node_id: &DagNodeId,
        action_type: DagActionType,
    ) -> Result<bool> {
        self.actions.add(&DagAction::job(node_id, action_type))
    }

    fn dag_action_exists(&self, action: &DagAction) -> Result<bool> {
        self.actions.exists(action)
    }

    fn delete_dag_action(&self, action: &DagAction) -> Result<bool> {
        self.actions.delete(action)
    }

    fn delete_dag_actions(&self, dag_id: &DagId) -> Result<usize> {
        let mut deleted = 0usize;
        for action in self.actions.actions_for(dag_id)? {
            if self.actions.delete(&action)? {
                deleted = deleted.saturating_add(1);
            }
        }
        Ok(deleted)
    }

    fn try_acquire_quota(&self, nodes: &[DagNode]) -> Result<QuotaDecision> {
        Ok(self.lock_state()?.quota.try_acquire(nodes))
    }

    fn release_quota(&self, node: &DagNode) -> Result<bool> {
        Ok(self.lock_state()?.quota.release(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::InMemoryActionLog;
    use crate::dag::{JobExecutionPlan, JobSpec};
    use crate::store::status::InMemoryStatusFeed;
    use crate::types::{ExecutionStatus, FailureOption};

    fn dag() -> Dag {
        let id = DagId::new("g", "f", 1);
        let mk = |name: &str, deps: &[&str]| {
            DagNode::new(
                JobExecutionPlan {
                    dag_id: id.clone(),
                    job: JobSpec {
                        name: name.into(),
                        command: String::new(),
                        properties: Default::default(),
                    },
                    executor: "fake".into(),
                    proxy_user: "alice".into(),
                    failure_option: FailureOption::FinishRunning,
                },
                deps.iter().map(|d| d.to_string()).collect(),
            )
        };
        Dag::new(id.clone(), vec![mk("a", &[]), mk("b", &["a"])]).unwrap()
    }

    fn store(limits: QuotaLimits) -> (InMemoryDagStateStore, Arc<InMemoryStatusFeed>) {
        let statuses = Arc::new(InMemoryStatusFeed::new());
        let store = InMemoryDagStateStore::new(
            Arc::new(InMemoryActionLog::new()),
            statuses.clone(),
            limits,
        );
        (store, statuses)
    }

    #[test]
    fn duplicate_dag_is_rejected() {
        let (store, _) = store(QuotaLimits::unlimited());
        store.add_dag(&dag()).unwrap();
        let err = store.add_dag(&dag()).unwrap_err();
        assert!(matches!(err, FlowdagError::DuplicateDag(_)));
    }

    #[test]
    fn node_writes_only_move_forward() {
        let (store, _) = store(QuotaLimits::unlimited());
        let dag = dag();
        store.add_dag(&dag).unwrap();
        let a = dag.node("a").unwrap();

        let running = a.with_status(ExecutionStatus::Running);
        assert_eq!(
            store.add_dag_node_state(&running, dag.id()).unwrap(),
            NodeStateChange::Applied
        );
        assert_eq!(
            store.add_dag_node_state(&running, dag.id()).unwrap(),
            NodeStateChange::Stale
        );

        let done = a.with_status(ExecutionStatus::Complete);
        assert!(store.add_dag_node_state(&done, dag.id()).unwrap().is_applied());
        let back = a.with_status(ExecutionStatus::Running);
        assert_eq!(
            store.add_dag_node_state(&back, dag.id()).unwrap(),
            NodeStateChange::Stale
        );

        let stored = store.get_dag(dag.id()).unwrap().unwrap();
        assert_eq!(stored.node("a").unwrap().status, ExecutionStatus::Complete);
        assert_eq!(stored.version(), 2);
    }

    #[test]
    fn unclaimed_node_cannot_complete() {
        let (store, _) = store(QuotaLimits::unlimited());
        let dag = dag();
        store.add_dag(&dag).unwrap();
        let a = dag.node("a").unwrap();

        assert_eq!(
            store
                .add_dag_node_state(&a.with_status(ExecutionStatus::Complete), dag.id())
                .unwrap(),
            NodeStateChange::Stale
        );
        let stored = store.get_dag(dag.id()).unwrap().unwrap();
        assert_eq!(stored.node("a").unwrap().status, ExecutionStatus::Pending);
        assert_eq!(stored.version(), 0);
    }

    #[test]
    fn terminal_write_releases_quota() {
        let (store, _) = store(QuotaLimits::unlimited().with_user_limit("alice", 1));
        let dag = dag();
        store.add_dag(&dag).unwrap();
        let a = dag.node("a").unwrap();

        assert!(store.try_acquire_quota(std::slice::from_ref(a)).unwrap().is_granted());
        assert_eq!(store.running_for_user("alice").unwrap(), 1);
        store
            .add_dag_node_state(&a.with_status(ExecutionStatus::Running), dag.id())
            .unwrap();
        store
            .add_dag_node_state(&a.with_status(ExecutionStatus::Failed), dag.id())
            .unwrap();
        assert_eq!(store.running_for_user("alice").unwrap(), 0);
    }

    #[test]
    fn deleting_a_dag_releases_quota_and_reports_missing_writes() {
        let (store, _) = store(QuotaLimits::unlimited());
        let dag = dag();
        store.add_dag(&dag).unwrap();
        let a = dag.node("a").unwrap();
        store.try_acquire_quota(std::slice::from_ref(a)).unwrap();

        assert!(store.delete_dag(dag.id()).unwrap());
        assert!(!store.delete_dag(dag.id()).unwrap());
        assert_eq!(store.running_for_flow_group("g").unwrap(), 0);
        assert_eq!(
            store
                .add_dag_node_state(&a.with_status(ExecutionStatus::Running), dag.id())
                .unwrap(),
            NodeStateChange::Missing
        );
    }

    #[test]
    fn node_lookup_carries_the_latest_reported_status() {
        let (store, statuses) = store(QuotaLimits::unlimited());
        let dag = dag();
        store.add_dag(&dag).unwrap();
        let node_id = dag.id().node("a");

        let (node, status) = store.get_dag_node_with_job_status(&node_id).unwrap();
        assert!(node.is_some());
        assert!(status.is_none());

        statuses
            .report(node_id.clone(), JobStatus::new(ExecutionStatus::Complete))
            .unwrap();
        let (_, status) = store.get_dag_node_with_job_status(&node_id).unwrap();
        assert_eq!(status.unwrap().status, ExecutionStatus::Complete);

        assert!(store.delete_dag(dag.id()).unwrap());
        assert!(statuses.is_empty().unwrap(), "statuses go with the dag");
    }

    #[test]
    fn delete_dag_actions_only_touches_that_execution() {
        let (store, _) = store(QuotaLimits::unlimited());
        let mine = DagId::new("g", "f", 1);
        let other = DagId::new("g", "f", 2);
        store
            .add_flow_dag_action(&mine, DagActionType::EnforceFlowFinishDeadline)
            .unwrap();
        store
            .add_job_dag_action(&mine.node("a"), DagActionType::Reevaluate)
            .unwrap();
        store.add_flow_dag_action(&other, DagActionType::Launch).unwrap();

        assert_eq!(store.delete_dag_actions(&mine).unwrap(), 2);
        assert_eq!(store.action_log().pending().unwrap().len(), 1);
    }

    #[test]
    fn first_failure_wins() {
        let (store, _) = store(QuotaLimits::unlimited());
        let dag = dag();
        store.add_dag(&dag).unwrap();
        assert!(store.fail_dag(dag.id(), FlowFailure::Killed).unwrap().is_applied());
        assert_eq!(
            store.fail_dag(dag.id(), FlowFailure::JobFailed).unwrap(),
            NodeStateChange::Stale
        );
        assert_eq!(
            store.get_dag(dag.id()).unwrap().unwrap().failure(),
            Some(FlowFailure::Killed)
        );
    }

    #[tokio::test]
    async fn critical_section_is_shared_per_dag() {
        let (store, _) = store(QuotaLimits::unlimited());
        let id = DagId::new("g", "f", 1);
        let first = store.critical_section(&id).unwrap();
        let second = store.critical_section(&id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let _guard = first.lock().await;
        assert!(second.try_lock().is_err());
        let other = store.critical_section(&DagId::new("g", "f", 2)).unwrap();
        assert!(other.try_lock().is_ok());
    }
}
