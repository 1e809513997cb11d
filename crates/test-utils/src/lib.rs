pub mod builders;
pub mod fake_executor;
pub mod recording;

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use flowdag::action::{ActionChange, ActionLog, ChangeKind, DagAction, DagActionType};
use flowdag::dag::{Dag, DagId, DagNodeId};
use flowdag::engine::{DagTask, EngineOptions, FlowEvent};
use flowdag::errors::Result;
use flowdag::exec::{CompletionReporter, ExecutorRegistry};
use flowdag::proc::{DagProc, ProcContext, ProcOutcome};
use flowdag::store::{
    DagStateStore, InMemoryDagStateStore, InMemoryStatusFeed, JobStatus, QuotaLimits,
};
use flowdag::types::ExecutionStatus;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing_subscriber::EnvFilter;

use crate::builders::{FAKE_EXECUTOR, StaticFlowCompiler};
use crate::fake_executor::RecordingExecutor;
use crate::recording::RecordingActionLog;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("flowdag=debug"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Run a future with a timeout, failing the test instead of hanging forever.
pub async fn with_timeout<F, T>(fut: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("Test timed out")
}

/// Engine options with short delays, suitable for tests.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        num_threads: 4,
        multi_active_scheduler_enabled: false,
        reminder_delay: Duration::from_millis(200),
        quota_retry_delay: Duration::from_millis(20),
        max_dispatch_attempts: 3,
        dispatch_retry_backoff: Duration::from_millis(1),
        transient_retry_attempts: 2,
    }
}

/// Drives processors directly, without an engine.
///
/// The harness follows the action log's change feed like the change monitor
/// does, so [`ProcHarness::drain`] processes everything the processors (and
/// the fake executor's completion reports) enqueue, in feed order.
pub struct ProcHarness {
    pub actions: Arc<RecordingActionLog>,
    pub statuses: Arc<InMemoryStatusFeed>,
    pub store: Arc<InMemoryDagStateStore>,
    pub executor: Arc<RecordingExecutor>,
    pub compiler: Arc<StaticFlowCompiler>,
    pub reporter: CompletionReporter,
    pub ctx: ProcContext,
    feed: broadcast::Receiver<ActionChange>,
    events: broadcast::Receiver<FlowEvent>,
}

impl ProcHarness {
    /// Unlimited quota; jobs only finish when the test reports them.
    pub fn new() -> Self {
        Self::build(QuotaLimits::unlimited(), fast_options(), false)
    }

    /// Unlimited quota; every submitted job completes immediately.
    pub fn auto_completing() -> Self {
        Self::build(QuotaLimits::unlimited(), fast_options(), true)
    }

    pub fn with_quota(limits: QuotaLimits) -> Self {
        Self::build(limits, fast_options(), false)
    }

    pub fn build(limits: QuotaLimits, options: EngineOptions, auto_complete: bool) -> Self {
        let actions = Arc::new(RecordingActionLog::new());
        let statuses = Arc::new(InMemoryStatusFeed::new());
        let store = Arc::new(InMemoryDagStateStore::new(
            actions.clone(),
            statuses.clone(),
            limits,
        ));
        let reporter = CompletionReporter::new(statuses.clone(), actions.clone());
        let executor = Arc::new(if auto_complete {
            RecordingExecutor::completing(reporter.clone())
        } else {
            RecordingExecutor::new()
        });
        let compiler = Arc::new(StaticFlowCompiler::new());
        let (events_tx, events) = broadcast::channel(64);

        let ctx = ProcContext {
            compiler: compiler.clone(),
            executors: ExecutorRegistry::new().with(FAKE_EXECUTOR, executor.clone()),
            events: events_tx,
            options,
        };

        Self {
            feed: actions.subscribe(),
            actions,
            statuses,
            store,
            executor,
            compiler,
            reporter,
            ctx,
            events,
        }
    }

    /// Make `dag` what the compiler returns for its id.
    pub fn register(&self, dag: Dag) -> DagId {
        self.compiler.register(dag)
    }

    /// Insert an action into the log (it is picked up by [`Self::drain`]).
    pub fn enqueue(&self, action: &DagAction) -> bool {
        self.actions.add(action).expect("action log add failed")
    }

    /// Insert a LAUNCH for `dag_id` and process it right away.
    pub async fn launch(&self, dag_id: &DagId) -> Result<ProcOutcome> {
        let action = DagAction::flow(dag_id, DagActionType::Launch);
        self.enqueue(&action);
        self.process(&action).await
    }

    /// Run the processor for `action` the way a worker does.
    pub async fn process(&self, action: &DagAction) -> Result<ProcOutcome> {
        let task = DagTask::new(action.clone(), self.store.clone() as Arc<dyn DagStateStore>);
        DagProc::for_action(action).process(&task, &self.ctx).await
    }

    /// Process every Insert/Update seen on the feed until it is quiet.
    ///
    /// Returns the actions that asked to be retried later.
    pub async fn drain(&mut self) -> Result<Vec<DagAction>> {
        let mut deferred = Vec::new();
        for _ in 0..10_000 {
            let change = match self.feed.try_recv() {
                Ok(change) => change,
                Err(TryRecvError::Lagged(_)) => panic!("harness feed lagged"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(deferred),
            };
            if change.kind == ChangeKind::Delete {
                continue;
            }
            if let ProcOutcome::Retry { .. } = self.process(&change.action).await? {
                deferred.push(change.action);
            }
        }
        panic!("drain did not settle");
    }

    /// Report a job status the way an external monitor would.
    pub fn report(&self, node_id: &DagNodeId, status: ExecutionStatus) {
        self.reporter.report(node_id, JobStatus::new(status));
    }

    pub fn complete(&self, dag_id: &DagId, job: &str) {
        self.report(&dag_id.node(job), ExecutionStatus::Complete);
    }

    pub fn fail(&self, dag_id: &DagId, job: &str) {
        self.report(&dag_id.node(job), ExecutionStatus::Failed);
    }

    /// Flow events published since the last call.
    pub fn flow_events(&mut self) -> Vec<FlowEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn dag(&self, dag_id: &DagId) -> Option<Dag> {
        self.store.get_dag(dag_id).expect("store read failed")
    }

    pub fn status_of(&self, dag_id: &DagId, job: &str) -> Option<ExecutionStatus> {
        self.dag(dag_id)
            .and_then(|dag| dag.node(job).map(|n| n.status))
    }

    pub fn pending_actions(&self) -> Vec<DagAction> {
        self.actions.pending().expect("action log read failed")
    }
}

impl Default for ProcHarness {
    fn default() -> Self {
        Self::new()
    }
}
