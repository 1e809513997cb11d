// src/engine/pool.rs

//! Fixed-width pool of workers draining one shared task queue.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::DagTask;
use crate::engine::reminder::ReminderScheduler;
use crate::errors::{FlowdagError, Result};
use crate::proc::{DagProc, ProcContext, ProcOutcome};

const QUEUE_CAPACITY: usize = 1024;

pub struct WorkerPool {
    tx: mpsc::Sender<DagTask>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        width: usize,
        ctx: Arc<ProcContext>,
        reminders: Arc<ReminderScheduler>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<DagTask>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..width.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&ctx);
                let reminders = Arc::clone(&reminders);
                tokio::spawn(async move {
                    worker_loop(worker, rx, ctx, reminders).await;
                })
            })
            .collect();

        info!(width = width.max(1), "worker pool started");
        Self { tx, workers }
    }

    pub async fn submit(&self, task: DagTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| FlowdagError::Transient("worker pool is shut down".to_string()))
    }

    /// Stop accepting tasks and wait for queued ones to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<DagTask>>>,
    ctx: Arc<ProcContext>,
    reminders: Arc<ReminderScheduler>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };
        run_task(worker, task, &ctx, &reminders).await;
    }
    debug!(worker, "worker finished (queue closed)");
}

async fn run_task(worker: usize, task: DagTask, ctx: &ProcContext, reminders: &ReminderScheduler) {
    let proc = DagProc::for_action(&task.action);
    let mut attempt: u32 = 0;

    loop {
        match proc.process(&task, ctx).await {
            Ok(ProcOutcome::Done) => {
                debug!(worker, action = %task.action, "action processed");
                return;
            }
            Ok(ProcOutcome::Retry { after }) => {
                debug!(worker, action = %task.action, ?after, "action deferred");
                reminders.arm(task.action.clone(), after);
                return;
            }
            Err(err) if err.is_retryable() && attempt < ctx.options.transient_retry_attempts => {
                attempt += 1;
                warn!(worker, action = %task.action, attempt, error = %err, "transient failure; retrying");
                tokio::time::sleep(ctx.options.dispatch_retry_backoff).await;
            }
            Err(err) => {
                error!(
                    worker,
                    action = %task.action,
                    error = %err,
                    "processing failed; action left for redelivery"
                );
                reminders.arm(task.action.clone(), ctx.options.reminder_delay);
                return;
            }
        }
    }
}
