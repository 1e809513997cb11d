// src/engine/monitor.rs

//! Change monitor: action log feed in, DagTasks out.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::action::{ActionChange, ActionLog, ChangeKind, DagAction};
use crate::engine::{DagTask, EngineOptions};
use crate::engine::pool::WorkerPool;
use crate::engine::reminder::ReminderScheduler;
use crate::store::DagStateStore;

pub(crate) struct ChangeMonitor {
    pub(crate) actions: Arc<dyn ActionLog>,
    pub(crate) store: Arc<dyn DagStateStore>,
    pub(crate) pool: WorkerPool,
    pub(crate) reminders: Arc<ReminderScheduler>,
    pub(crate) fired_rx: mpsc::UnboundedReceiver<DagAction>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) options: EngineOptions,
}

impl ChangeMonitor {
    pub(crate) async fn run(mut self) {
        // Subscribe before the resync so nothing inserted in between is missed.
        let mut feed = self.actions.subscribe();
        self.resync("startup").await;

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("shutdown requested; change monitor stopping");
                        break;
                    }
                }

                change = feed.recv() => match change {
                    Ok(change) => self.on_change(change).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "change feed lagged");
                        self.resync("lag").await;
                    }
                    Err(RecvError::Closed) => {
                        info!("change feed closed; change monitor stopping");
                        break;
                    }
                },

                Some(action) = self.fired_rx.recv() => self.on_reminder(action).await,
            }
        }

        self.reminders.cancel_all();
        self.pool.shutdown().await;
    }

    async fn on_change(&self, change: ActionChange) {
        match change.kind {
            ChangeKind::Insert | ChangeKind::Update => self.dispatch(change.action).await,
            ChangeKind::Delete => {
                if self.reminders.cancel(&change.action) {
                    debug!(action = %change.action, "action deleted; reminder disarmed");
                }
            }
        }
    }

    async fn on_reminder(&self, action: DagAction) {
        match self.actions.exists(&action) {
            Ok(true) => {
                info!(action = %action, "reminder fired for outstanding action; redelivering");
                self.dispatch(action).await;
            }
            Ok(false) => debug!(action = %action, "reminder fired for processed action"),
            Err(err) => {
                warn!(action = %action, error = %err, "could not check reminded action; re-arming");
                self.reminders.arm(action, self.options.reminder_delay);
            }
        }
    }

    async fn resync(&self, reason: &str) {
        match self.actions.pending() {
            Ok(pending) => {
                info!(reason, count = pending.len(), "resyncing pending actions");
                for action in pending {
                    self.dispatch(action).await;
                }
            }
            Err(err) => warn!(reason, error = %err, "could not read pending actions"),
        }
    }

    async fn dispatch(&self, action: DagAction) {
        // Arm first, so a Retry armed by the worker is never overwritten by
        // the safety reminder.
        if self.options.multi_active_scheduler_enabled {
            self.reminders.arm(action.clone(), self.options.reminder_delay);
        }
        debug!(action = %action, "dispatching action");
        let task = DagTask::new(action, Arc::clone(&self.store));
        if let Err(err) = self.pool.submit(task).await {
            warn!(error = %err, "could not hand task to worker pool");
        }
    }
}
