// src/engine/runtime.rs

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::action::ActionLog;
use crate::compiler::FlowCompiler;
use crate::engine::monitor::ChangeMonitor;
use crate::engine::pool::WorkerPool;
use crate::engine::reminder::ReminderScheduler;
use crate::engine::{EngineOptions, FlowEvent};
use crate::errors::{FlowdagError, Result};
use crate::exec::ExecutorRegistry;
use crate::proc::ProcContext;
use crate::store::DagStateStore;

const FLOW_EVENT_CAPACITY: usize = 256;

/// One scheduler replica.
///
/// Several engines may share the same store and action log; each one follows
/// the feed on its own and the store keeps their effects exactly-once.
pub struct Engine {
    options: EngineOptions,
    store: Arc<dyn DagStateStore>,
    actions: Arc<dyn ActionLog>,
    compiler: Arc<dyn FlowCompiler>,
    executors: ExecutorRegistry,
    events: broadcast::Sender<FlowEvent>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        store: Arc<dyn DagStateStore>,
        actions: Arc<dyn ActionLog>,
        compiler: Arc<dyn FlowCompiler>,
        executors: ExecutorRegistry,
    ) -> Self {
        let (events, _rx) = broadcast::channel(FLOW_EVENT_CAPACITY);
        Self {
            options,
            store,
            actions,
            compiler,
            executors,
            events,
        }
    }

    pub fn subscribe_flow_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Spawn the change monitor and worker pool. Pending actions already in
    /// the log are dispatched right away.
    pub fn start(self) -> EngineHandle {
        let ctx = Arc::new(ProcContext {
            compiler: self.compiler,
            executors: self.executors,
            events: self.events.clone(),
            options: self.options.clone(),
        });

        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let reminders = Arc::new(ReminderScheduler::new(fired_tx));
        let pool = WorkerPool::spawn(self.options.num_threads, ctx, Arc::clone(&reminders));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = ChangeMonitor {
            actions: self.actions,
            store: self.store,
            pool,
            reminders,
            fired_rx,
            shutdown_rx,
            options: self.options.clone(),
        };

        info!(
            num_threads = self.options.num_threads,
            multi_active = self.options.multi_active_scheduler_enabled,
            "engine started"
        );
        EngineHandle {
            shutdown_tx,
            monitor: tokio::spawn(monitor.run()),
            events: self.events,
        }
    }
}

pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    monitor: JoinHandle<()>,
    events: broadcast::Sender<FlowEvent>,
}

impl EngineHandle {
    pub fn subscribe_flow_events(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Stop following the feed, let in-flight tasks finish, and wait.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.monitor
            .await
            .map_err(|e| FlowdagError::Other(anyhow!("change monitor task failed: {e}")))?;
        info!("engine stopped");
        Ok(())
    }
}
