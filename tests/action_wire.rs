// tests/action_wire.rs

mod common;
use crate::common::TestResult;

use serde_json::json;

use flowdag::action::{DagAction, DagActionType};
use flowdag::dag::DagId;
use flowdag::store::JobStatus;
use flowdag::types::ExecutionStatus;

#[test]
fn job_action_uses_camel_case_fields_and_screaming_types() -> TestResult {
    let action = DagAction::job(
        &DagId::new("etl", "daily", 1700000000000).node("load"),
        DagActionType::EnforceFlowFinishDeadline,
    );

    let value = serde_json::to_value(&action)?;
    assert_eq!(
        value,
        json!({
            "flowGroup": "etl",
            "flowName": "daily",
            "flowExecutionId": 1700000000000_i64,
            "jobName": "load",
            "actionType": "ENFORCE_FLOW_FINISH_DEADLINE"
        })
    );
    Ok(())
}

#[test]
fn flow_action_parses_without_job_name() -> TestResult {
    let action: DagAction = serde_json::from_value(json!({
        "flowGroup": "etl",
        "flowName": "daily",
        "flowExecutionId": 7,
        "jobName": null,
        "actionType": "KILL"
    }))?;

    assert_eq!(action, DagAction::flow(&DagId::new("etl", "daily", 7), DagActionType::Kill));
    assert!(action.node_id().is_none());
    assert_eq!(action.to_string(), "KILL:etl/daily/7");
    Ok(())
}

#[test]
fn unknown_action_type_is_rejected() {
    let parsed = serde_json::from_value::<DagAction>(json!({
        "flowGroup": "etl",
        "flowName": "daily",
        "flowExecutionId": 7,
        "jobName": null,
        "actionType": "RESUME"
    }));
    assert!(parsed.is_err());
}

#[test]
fn job_status_message_is_optional() -> TestResult {
    let status: JobStatus = serde_json::from_value(json!({ "status": "FAILED" }))?;
    assert_eq!(status, JobStatus::new(ExecutionStatus::Failed));

    let status: JobStatus =
        serde_json::from_value(json!({ "status": "COMPLETE", "message": "ok" }))?;
    assert_eq!(status.message.as_deref(), Some("ok"));
    Ok(())
}
