// src/exec/process.rs

//! Local executor running each job's command through the shell.

use std::collections::HashMap;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dag::{DagNodeId, JobExecutionPlan};
use crate::errors::{FlowdagError, Result};
use crate::exec::backend::{BoxFuture, CompletionReporter, JobExecutor};
use crate::store::JobStatus;
use crate::types::ExecutionStatus;

enum ExecutorCommand {
    Start(JobExecutionPlan),
    Cancel(DagNodeId),
}

/// Handle for a job process that is still running.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Runs `JobSpec::command` via `sh -c` (`cmd /C` on Windows).
///
/// At most one process per job runs at a time; a second submit for a job that
/// is still running is ignored. On exit the process outcome is handed to the
/// [`CompletionReporter`]. Must be created inside a Tokio runtime.
pub struct ProcessExecutor {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl ProcessExecutor {
    pub fn new(reporter: CompletionReporter) -> Self {
        let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(32);

        tokio::spawn(async move {
            info!("process executor loop started");
            let mut active: HashMap<DagNodeId, ActiveJob> = HashMap::new();

            while let Some(command) = rx.recv().await {
                active.retain(|_, job| !job.handle.is_finished());
                match command {
                    ExecutorCommand::Start(plan) => start_job(plan, &mut active, &reporter),
                    ExecutorCommand::Cancel(node_id) => cancel_job(&node_id, &mut active),
                }
            }

            info!("process executor loop finished (channel closed)");
        });

        Self { tx }
    }

    fn send(&self, command: ExecutorCommand) -> BoxFuture<'_, Result<()>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(command).await.map_err(|_| {
                FlowdagError::ExecutorError("process executor loop is gone".to_string())
            })
        })
    }
}

impl JobExecutor for ProcessExecutor {
    fn submit(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>> {
        self.send(ExecutorCommand::Start(plan))
    }

    fn cancel(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>> {
        self.send(ExecutorCommand::Cancel(plan.node_id()))
    }
}

fn start_job(
    plan: JobExecutionPlan,
    active: &mut HashMap<DagNodeId, ActiveJob>,
    reporter: &CompletionReporter,
) {
    let node_id = plan.node_id();
    if active.contains_key(&node_id) {
        debug!(job = %node_id, "job already running; ignoring duplicate submit");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let reporter = reporter.clone();
    let id = node_id.clone();
    let handle = tokio::spawn(async move {
        let status = match run_job(&plan, cancel_rx).await {
            Ok(status) => status,
            Err(err) => {
                error!(job = %id, error = %err, "job execution error");
                JobStatus::new(ExecutionStatus::Failed).with_message(err.to_string())
            }
        };
        reporter.report(&id, status);
    });

    active.insert(
        node_id,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_job(node_id: &DagNodeId, active: &mut HashMap<DagNodeId, ActiveJob>) {
    let Some(job) = active.get_mut(node_id) else {
        debug!(job = %node_id, "cancel requested for job that is not running");
        return;
    };
    match job.cancel.take() {
        Some(cancel) => {
            info!(job = %node_id, "cancelling job process");
            if cancel.send(()).is_err() {
                debug!(job = %node_id, "job process already finished while cancelling");
            }
        }
        None => debug!(job = %node_id, "job process already being cancelled"),
    }
}

async fn run_job(
    plan: &JobExecutionPlan,
    mut cancel_rx: oneshot::Receiver<()>,
) -> anyhow::Result<JobStatus> {
    let node_id = plan.node_id();
    info!(job = %node_id, cmd = %plan.job.command, "starting job process");

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&plan.job.command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&plan.job.command);
        c
    };

    cmd.env("FLOWDAG_FLOW_GROUP", &plan.dag_id.flow_group)
        .env("FLOWDAG_FLOW_NAME", &plan.dag_id.flow_name)
        .env(
            "FLOWDAG_FLOW_EXECUTION_ID",
            plan.dag_id.flow_execution_id.to_string(),
        )
        .env("FLOWDAG_JOB_NAME", &plan.job.name)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for job '{node_id}'"))?;

    if let Some(stdout) = child.stdout.take() {
        let id = node_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(job = %id, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let id = node_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of job '{node_id}'"))?;
            let code = status.code().unwrap_or(-1);
            info!(job = %node_id, exit_code = code, success = status.success(), "job process exited");

            if status.success() {
                Ok(JobStatus::new(ExecutionStatus::Complete))
            } else {
                Ok(JobStatus::new(ExecutionStatus::Failed)
                    .with_message(format!("exit code {code}")))
            }
        }

        cancel = &mut cancel_rx => {
            if cancel.is_err() {
                // Sender dropped with the executor; kill_on_drop takes care of
                // the child.
                debug!(job = %node_id, "cancel channel closed without explicit cancellation");
            }
            if let Err(e) = child.kill().await {
                warn!(job = %node_id, error = %e, "failed to kill job process");
            }
            Ok(JobStatus::new(ExecutionStatus::Cancelled).with_message("cancelled"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::action::{ActionLog, DagAction, DagActionType, InMemoryActionLog};
    use crate::dag::{DagId, JobSpec};
    use crate::store::{InMemoryStatusFeed, StatusFeed};
    use crate::types::FailureOption;

    fn plan(job: &str, command: &str) -> JobExecutionPlan {
        JobExecutionPlan {
            dag_id: DagId::new("g", "f", 1),
            job: JobSpec {
                name: job.into(),
                command: command.into(),
                properties: Default::default(),
            },
            executor: "local".into(),
            proxy_user: "u".into(),
            failure_option: FailureOption::FinishRunning,
        }
    }

    async fn wait_for_status(
        feed: &InMemoryStatusFeed,
        node_id: &DagNodeId,
    ) -> Option<JobStatus> {
        for _ in 0..200 {
            if let Some(status) = feed.latest_status(node_id).unwrap() {
                return Some(status);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        None
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_is_reported_and_reevaluation_requested() {
        let feed = Arc::new(InMemoryStatusFeed::new());
        let log = Arc::new(InMemoryActionLog::new());
        let executor = ProcessExecutor::new(CompletionReporter::new(feed.clone(), log.clone()));

        executor.submit(plan("ok", "true")).await.unwrap();
        executor.submit(plan("bad", "exit 3")).await.unwrap();

        let ok = plan("ok", "").node_id();
        let bad = plan("bad", "").node_id();
        assert_eq!(
            wait_for_status(&feed, &ok).await.unwrap().status,
            ExecutionStatus::Complete
        );
        let failed = wait_for_status(&feed, &bad).await.unwrap();
        assert_eq!(failed.status, ExecutionStatus::Failed);
        assert_eq!(failed.message.as_deref(), Some("exit code 3"));

        assert!(log.exists(&DagAction::job(&ok, DagActionType::Reevaluate)).unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_the_process() {
        let feed = Arc::new(InMemoryStatusFeed::new());
        let log = Arc::new(InMemoryActionLog::new());
        let executor = ProcessExecutor::new(CompletionReporter::new(feed.clone(), log));

        executor.submit(plan("slow", "sleep 30")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.cancel(plan("slow", "sleep 30")).await.unwrap();

        let status = wait_for_status(&feed, &plan("slow", "").node_id())
            .await
            .unwrap();
        assert_eq!(status.status, ExecutionStatus::Cancelled);
    }
}
