#![allow(dead_code)]

use std::error::Error;

use flowdag::action::{DagAction, DagActionType};
use flowdag::dag::DagId;

pub use flowdag_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

pub fn reevaluate(dag_id: &DagId, job: &str) -> DagAction {
    DagAction::job(&dag_id.node(job), DagActionType::Reevaluate)
}

pub fn enforce(dag_id: &DagId) -> DagAction {
    DagAction::flow(dag_id, DagActionType::EnforceFlowFinishDeadline)
}

pub fn kill(dag_id: &DagId) -> DagAction {
    DagAction::flow(dag_id, DagActionType::Kill)
}

pub fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}
