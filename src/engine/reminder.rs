// src/engine/reminder.rs

//! Delayed re-delivery of actions.
//!
//! At most one reminder is armed per action; arming again replaces the
//! previous one. A fired reminder only hands the action back to the change
//! monitor, which checks whether it is still in the log before dispatching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::action::DagAction;

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Reminders {
    next_generation: u64,
    armed: HashMap<DagAction, Armed>,
}

pub struct ReminderScheduler {
    reminders: Arc<Mutex<Reminders>>,
    fired_tx: mpsc::UnboundedSender<DagAction>,
}

fn lock(reminders: &Mutex<Reminders>) -> MutexGuard<'_, Reminders> {
    // The map stays consistent even if a holder panicked.
    reminders.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReminderScheduler {
    /// Fired actions are sent to `fired_tx`.
    pub fn new(fired_tx: mpsc::UnboundedSender<DagAction>) -> Self {
        Self {
            reminders: Arc::new(Mutex::new(Reminders::default())),
            fired_tx,
        }
    }

    pub fn arm(&self, action: DagAction, delay: Duration) {
        let mut reminders = lock(&self.reminders);
        reminders.next_generation = reminders.next_generation.wrapping_add(1);
        let generation = reminders.next_generation;

        let shared = Arc::clone(&self.reminders);
        let tx = self.fired_tx.clone();
        let fired = action.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut reminders = lock(&shared);
                if reminders
                    .armed
                    .get(&fired)
                    .is_some_and(|armed| armed.generation == generation)
                {
                    reminders.armed.remove(&fired);
                }
            }
            debug!(action = %fired, "reminder fired");
            let _ = tx.send(fired);
        });

        trace!(action = %action, ?delay, "reminder armed");
        if let Some(previous) = reminders.armed.insert(action, Armed { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Disarm the reminder for `action`, if one is armed.
    pub fn cancel(&self, action: &DagAction) -> bool {
        match lock(&self.reminders).armed.remove(action) {
            Some(armed) => {
                armed.handle.abort();
                trace!(action = %action, "reminder cancelled");
                true
            }
            None => false,
        }
    }

    pub fn armed(&self) -> usize {
        lock(&self.reminders).armed.len()
    }

    pub fn cancel_all(&self) {
        for (_, armed) in lock(&self.reminders).armed.drain() {
            armed.handle.abort();
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DagActionType;
    use crate::dag::DagId;

    fn action(id: i64) -> DagAction {
        DagAction::flow(&DagId::new("g", "f", id), DagActionType::EnforceFlowFinishDeadline)
    }

    #[tokio::test]
    async fn armed_reminder_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reminders = ReminderScheduler::new(tx);
        reminders.arm(action(1), Duration::from_millis(20));
        assert_eq!(reminders.armed(), 1);

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, action(1));
        assert_eq!(reminders.armed(), 0);
    }

    #[tokio::test]
    async fn cancelled_reminder_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reminders = ReminderScheduler::new(tx);
        reminders.arm(action(1), Duration::from_millis(20));
        assert!(reminders.cancel(&action(1)));
        assert!(!reminders.cancel(&action(1)));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rearming_replaces_the_previous_reminder() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reminders = ReminderScheduler::new(tx);
        reminders.arm(action(1), Duration::from_millis(20));
        reminders.arm(action(1), Duration::from_millis(60));
        assert_eq!(reminders.armed(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err(), "first reminder must have been replaced");

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired, Some(action(1)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }
}
