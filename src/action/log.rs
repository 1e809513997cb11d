// src/action/log.rs

//! Deduplicating store of pending DagActions with a change feed.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::action::model::DagAction;
use crate::dag::DagId;
use crate::errors::{FlowdagError, Result};

/// Default number of change events buffered per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Rounds of `add` then `touch` before giving up on a contended action.
const ADD_OR_TOUCH_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change-feed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionChange {
    pub kind: ChangeKind,
    pub action: DagAction,
}

/// Contract of the durable action log.
///
/// - `add` of an already present action is a no-op and returns `false`.
/// - `delete` of an absent action is a no-op and returns `false`.
/// - Subscribers see an ordered, at-least-once feed; they must tolerate
///   duplicates and must resync through [`ActionLog::pending`] after lag.
pub trait ActionLog: Send + Sync {
    fn add(&self, action: &DagAction) -> Result<bool>;

    fn delete(&self, action: &DagAction) -> Result<bool>;

    fn exists(&self, action: &DagAction) -> Result<bool>;

    /// Re-announce a present action as an `Update` without changing it.
    fn touch(&self, action: &DagAction) -> Result<bool>;

    /// Insert `action`, or re-announce it if it is already present, so the
    /// feed always carries a fresh `Insert` or `Update` for it.
    ///
    /// The default goes around `add` and `touch` because a delete can land
    /// between the two calls.
    fn add_or_touch(&self, action: &DagAction) -> Result<ChangeKind> {
        for _ in 0..ADD_OR_TOUCH_ATTEMPTS {
            if self.add(action)? {
                return Ok(ChangeKind::Insert);
            }
            if self.touch(action)? {
                return Ok(ChangeKind::Update);
            }
        }
        Err(FlowdagError::Transient(format!(
            "{action} kept disappearing while being re-announced"
        )))
    }

    /// Every action currently in the log.
    fn pending(&self) -> Result<Vec<DagAction>>;

    /// Actions that belong to one flow execution.
    fn actions_for(&self, dag_id: &DagId) -> Result<Vec<DagAction>>;

    fn subscribe(&self) -> broadcast::Receiver<ActionChange>;
}

/// In-process [`ActionLog`] backed by an ordered set.
#[derive(Debug)]
pub struct InMemoryActionLog {
    actions: Mutex<BTreeSet<DagAction>>,
    feed: broadcast::Sender<ActionChange>,
}

impl InMemoryActionLog {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _rx) = broadcast::channel(capacity.max(1));
        Self {
            actions: Mutex::new(BTreeSet::new()),
            feed,
        }
    }

    fn publish(&self, kind: ChangeKind, action: &DagAction) {
        // No subscribers is fine: the log itself is the source of truth.
        let receivers = self
            .feed
            .send(ActionChange {
                kind,
                action: action.clone(),
            })
            .unwrap_or(0);
        trace!(%action, ?kind, receivers, "published action change");
    }
}

impl Default for InMemoryActionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionLog for InMemoryActionLog {
    fn add(&self, action: &DagAction) -> Result<bool> {
        let mut actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        if !actions.insert(action.clone()) {
            debug!(%action, "action already present; add is a no-op");
            return Ok(false);
        }
        self.publish(ChangeKind::Insert, action);
        Ok(true)
    }

    fn delete(&self, action: &DagAction) -> Result<bool> {
        let mut actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        if !actions.remove(action) {
            return Ok(false);
        }
        self.publish(ChangeKind::Delete, action);
        Ok(true)
    }

    fn exists(&self, action: &DagAction) -> Result<bool> {
        let actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        Ok(actions.contains(action))
    }

    fn touch(&self, action: &DagAction) -> Result<bool> {
        let actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        if !actions.contains(action) {
            return Ok(false);
        }
        self.publish(ChangeKind::Update, action);
        Ok(true)
    }

    fn add_or_touch(&self, action: &DagAction) -> Result<ChangeKind> {
        let mut actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        let kind = if actions.insert(action.clone()) {
            ChangeKind::Insert
        } else {
            ChangeKind::Update
        };
        self.publish(kind, action);
        Ok(kind)
    }

    fn pending(&self) -> Result<Vec<DagAction>> {
        let actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        Ok(actions.iter().cloned().collect())
    }

    fn actions_for(&self, dag_id: &DagId) -> Result<Vec<DagAction>> {
        let actions = self
            .actions
            .lock()
            .map_err(|_| FlowdagError::poisoned("action log"))?;
        Ok(actions
            .iter()
            .filter(|a| a.belongs_to(dag_id))
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ActionChange> {
        self.feed.subscribe()
    }
}
