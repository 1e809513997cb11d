use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use flowdag::action::DagAction;
use flowdag::compiler::FlowCompiler;
use flowdag::dag::{Dag, DagId, DagNode, JobExecutionPlan, JobSpec};
use flowdag::errors::Result;
use flowdag::types::FailureOption;

/// Executor name the harness registers its [`RecordingExecutor`] under.
///
/// [`RecordingExecutor`]: crate::fake_executor::RecordingExecutor
pub const FAKE_EXECUTOR: &str = "fake";

/// Builder for `Dag` to simplify test setup.
pub struct DagBuilder {
    id: DagId,
    jobs: Vec<(String, Vec<String>)>,
    executor: String,
    proxy_user: String,
    failure_option: FailureOption,
    max_duration: Option<Duration>,
    launched_at: Option<SystemTime>,
}

impl DagBuilder {
    pub fn new(group: &str, name: &str, execution_id: i64) -> Self {
        Self {
            id: DagId::new(group, name, execution_id),
            jobs: Vec::new(),
            executor: FAKE_EXECUTOR.to_string(),
            proxy_user: "tester".to_string(),
            failure_option: FailureOption::FinishRunning,
            max_duration: None,
            launched_at: None,
        }
    }

    pub fn job(mut self, name: &str, after: &[&str]) -> Self {
        self.jobs
            .push((name.to_string(), after.iter().map(|d| d.to_string()).collect()));
        self
    }

    pub fn executor(mut self, executor: &str) -> Self {
        self.executor = executor.to_string();
        self
    }

    pub fn proxy_user(mut self, user: &str) -> Self {
        self.proxy_user = user.to_string();
        self
    }

    pub fn failure_option(mut self, option: FailureOption) -> Self {
        self.failure_option = option;
        self
    }

    pub fn max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    pub fn launched_at(mut self, at: SystemTime) -> Self {
        self.launched_at = Some(at);
        self
    }

    pub fn id(&self) -> &DagId {
        &self.id
    }

    pub fn build(self) -> Dag {
        let nodes = self
            .jobs
            .into_iter()
            .map(|(name, after)| {
                DagNode::new(
                    JobExecutionPlan {
                        dag_id: self.id.clone(),
                        job: JobSpec {
                            name: name.clone(),
                            command: format!("echo {name}"),
                            properties: Default::default(),
                        },
                        executor: self.executor.clone(),
                        proxy_user: self.proxy_user.clone(),
                        failure_option: self.failure_option,
                    },
                    after,
                )
            })
            .collect();

        let dag = Dag::new(self.id, nodes)
            .expect("Failed to build valid dag from builder")
            .with_max_duration(self.max_duration);
        match self.launched_at {
            Some(at) => dag.with_launched_at(at),
            None => dag,
        }
    }
}

/// `single` with no dependencies.
pub fn single_node(execution_id: i64) -> DagBuilder {
    DagBuilder::new("group0", "single", execution_id).job("single", &[])
}

/// `job0 -> job1 -> ... -> job{n-1}`.
pub fn linear_chain(execution_id: i64, n: usize) -> DagBuilder {
    (0..n).fold(DagBuilder::new("group0", "chain", execution_id), |b, i| {
        if i == 0 {
            b.job("job0", &[])
        } else {
            let prev = format!("job{}", i - 1);
            b.job(&format!("job{i}"), &[prev.as_str()])
        }
    })
}

/// `D1, D2, D3 -> D4 -> {D5, D6}`.
pub fn fan_in_fan_out(execution_id: i64) -> DagBuilder {
    DagBuilder::new("group0", "fan", execution_id)
        .job("D1", &[])
        .job("D2", &[])
        .job("D3", &[])
        .job("D4", &["D1", "D2", "D3"])
        .job("D5", &["D4"])
        .job("D6", &["D4"])
}

/// Flow compiler serving pre-built Dags by id.
#[derive(Default)]
pub struct StaticFlowCompiler {
    dags: Mutex<HashMap<DagId, Dag>>,
    calls: Mutex<usize>,
}

impl StaticFlowCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `dag` for LAUNCHes of its id; returns that id.
    pub fn register(&self, dag: Dag) -> DagId {
        let id = dag.id().clone();
        self.dags.lock().unwrap().insert(id.clone(), dag);
        id
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl FlowCompiler for StaticFlowCompiler {
    fn compile(&self, action: &DagAction) -> Result<Option<Dag>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.dags.lock().unwrap().get(&action.dag_id()).cloned())
    }
}
