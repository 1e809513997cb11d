use std::sync::Mutex;

use flowdag::action::{ActionChange, ActionLog, DagAction, DagActionType, InMemoryActionLog};
use flowdag::dag::DagId;
use flowdag::errors::Result;
use tokio::sync::broadcast;

/// Action log that remembers every `add` call (including no-op duplicates)
/// and every delete that removed something.
#[derive(Default)]
pub struct RecordingActionLog {
    inner: InMemoryActionLog,
    adds: Mutex<Vec<DagAction>>,
    deletes: Mutex<Vec<DagAction>>,
}

impl RecordingActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adds(&self) -> Vec<DagAction> {
        self.adds.lock().unwrap().clone()
    }

    pub fn adds_of(&self, action_type: DagActionType) -> Vec<DagAction> {
        self.adds()
            .into_iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    pub fn deletes(&self) -> Vec<DagAction> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn deletes_of(&self, action: &DagAction) -> usize {
        self.deletes().iter().filter(|a| *a == action).count()
    }

    pub fn clear_history(&self) {
        self.adds.lock().unwrap().clear();
        self.deletes.lock().unwrap().clear();
    }
}

impl ActionLog for RecordingActionLog {
    fn add(&self, action: &DagAction) -> Result<bool> {
        self.adds.lock().unwrap().push(action.clone());
        self.inner.add(action)
    }

    fn delete(&self, action: &DagAction) -> Result<bool> {
        let removed = self.inner.delete(action)?;
        if removed {
            self.deletes.lock().unwrap().push(action.clone());
        }
        Ok(removed)
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
