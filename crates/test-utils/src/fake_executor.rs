use std::collections::HashSet;
use std::sync::Mutex;

use flowdag::dag::{DagNodeId, JobExecutionPlan};
use flowdag::errors::{FlowdagError, Result};
use flowdag::exec::{BoxFuture, CompletionReporter, JobExecutor};
use flowdag::store::JobStatus;
use flowdag::types::ExecutionStatus;

/// A fake executor that:
/// - records every submit and cancel
/// - optionally rejects submits for chosen jobs
/// - optionally reports each submitted job as finished right away
#[derive(Default)]
pub struct RecordingExecutor {
    submitted: Mutex<Vec<DagNodeId>>,
    cancelled: Mutex<Vec<DagNodeId>>,
    attempts: Mutex<usize>,
    rejected_jobs: Mutex<HashSet<String>>,
    failing_jobs: Mutex<HashSet<String>>,
    reporter: Option<CompletionReporter>,
}

impl RecordingExecutor {
    /// Records submissions; completion is up to the test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports every accepted job as COMPLETE (or FAILED, see
    /// [`RecordingExecutor::fail_job`]) as soon as it is submitted.
    pub fn completing(reporter: CompletionReporter) -> Self {
        Self {
            reporter: Some(reporter),
            ..Self::default()
        }
    }

    /// Every submit of `job` returns an executor error.
    pub fn reject_job(&self, job: &str) {
        self.rejected_jobs.lock().unwrap().insert(job.to_string());
    }

    /// When auto-completing, report `job` as FAILED.
    pub fn fail_job(&self, job: &str) {
        self.failing_jobs.lock().unwrap().insert(job.to_string());
    }

    pub fn submitted(&self) -> Vec<DagNodeId> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_jobs(&self) -> Vec<String> {
        self.submitted()
            .into_iter()
            .map(|id| id.job_name)
            .collect()
    }

    pub fn submissions_of(&self, job: &str) -> usize {
        self.submitted()
            .iter()
            .filter(|id| id.job_name == job)
            .count()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.job_name.clone())
            .collect()
    }

    /// All submit calls, accepted or rejected.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn clear(&self) {
        self.submitted.lock().unwrap().clear();
        self.cancelled.lock().unwrap().clear();
        *self.attempts.lock().unwrap() = 0;
    }
}

impl JobExecutor for RecordingExecutor {
    fn submit(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let node_id = plan.node_id();
            *self.attempts.lock().unwrap() += 1;

            let rejected = self.rejected_jobs.lock().unwrap().contains(&plan.job.name);
            if rejected {
                return Err(FlowdagError::ExecutorError(format!(
                    "submit rejected for {node_id}"
                )));
            }

            self.submitted.lock().unwrap().push(node_id.clone());

            if let Some(reporter) = &self.reporter {
                let fails = self.failing_jobs.lock().unwrap().contains(&plan.job.name);
                let status = if fails {
                    JobStatus::new(ExecutionStatus::Failed).with_message("fake failure")
                } else {
                    JobStatus::new(ExecutionStatus::Complete)
                };
                reporter.report(&node_id, status);
            }
            Ok(())
        })
    }

    fn cancel(&self, plan: JobExecutionPlan) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.cancelled.lock().unwrap().push(plan.node_id());
            Ok(())
        })
    }
}
