// tests/quota.rs

mod common;
use crate::common::{TestResult, init_tracing, reevaluate, sorted};

use flowdag::engine::FlowOutcome;
use flowdag::proc::ProcOutcome;
use flowdag::store::QuotaLimits;
use flowdag::types::ExecutionStatus;
use flowdag_test_utils::ProcHarness;
use flowdag_test_utils::builders::{DagBuilder, fan_in_fan_out};

#[tokio::test]
async fn denied_start_node_stays_pending_until_quota_frees_up() -> TestResult {
    init_tracing();
    let mut h = ProcHarness::with_quota(QuotaLimits::unlimited().with_user_limit("tester", 1));
    let dag_id = h.register(
        DagBuilder::new("group0", "pair", 1)
            .job("first", &[])
            .job("second", &[])
            .build(),
    );

    h.launch(&dag_id).await?;

    assert_eq!(h.executor.submitted_jobs(), vec!["first"]);
    assert_eq!(h.status_of(&dag_id, "second"), Some(ExecutionStatus::Pending));
    assert!(h.pending_actions().contains(&reevaluate(&dag_id, "second")));
    assert_eq!(h.store.running_for_user("tester")?, 1);

    // Still no room: the deferred launch asks to be retried.
    let outcome = h.process(&reevaluate(&dag_id, "second")).await?;
    assert_eq!(outcome, ProcOutcome::Retry { after: h.ctx.options.quota_retry_delay });
    assert!(h.pending_actions().contains(&reevaluate(&dag_id, "second")));
    assert_eq!(h.status_of(&dag_id, "second"), Some(ExecutionStatus::Pending));

    // Completing `first` frees the slot, and `second` is the only ready job,
    // so it is launched in place.
    h.complete(&dag_id, "first");
    h.process(&reevaluate(&dag_id, "first")).await?;
    assert_eq!(h.executor.submissions_of("second"), 1);
    assert_eq!(h.status_of(&dag_id, "second"), Some(ExecutionStatus::Running));
    assert_eq!(h.store.running_for_user("tester")?, 1);

    // The deferred REEVALUATE comes back after the launch went through.
    let outcome = h.process(&reevaluate(&dag_id, "second")).await?;
    assert_eq!(outcome, ProcOutcome::Done);
    assert_eq!(h.executor.submissions_of("second"), 1);
    assert!(!h.pending_actions().contains(&reevaluate(&dag_id, "second")));

    h.complete(&dag_id, "second");
    h.drain().await?;
    assert!(h.dag(&dag_id).is_none());
    assert_eq!(h.store.running_for_user("tester")?, 0);
    assert_eq!(
        h.flow_events().into_iter().map(|e| e.outcome).collect::<Vec<_>>(),
        vec![FlowOutcome::Succeeded]
    );
    Ok(())
}

#[tokio::test]
async fn flow_group_limit_serializes_a_wide_flow() -> TestResult {
    init_tracing();
    let mut h =
        ProcHarness::with_quota(QuotaLimits::unlimited().with_flow_group_limit("group0", 2));
    let dag_id = h.register(fan_in_fan_out(2).build());

    h.launch(&dag_id).await?;
    assert_eq!(h.executor.submitted().len(), 2);
    assert_eq!(h.store.running_for_flow_group("group0")?, 2);

    // Drive the flow to completion, retrying deferred launches after each
    // round of completions.
    for _ in 0..20 {
        if h.dag(&dag_id).is_none() {
            break;
        }
        let deferred = h.drain().await?;
        let running = h
            .dag(&dag_id)
            .map(|d| d.jobs_in(ExecutionStatus::Running))
            .unwrap_or_default();
        assert!(running.len() <= 2, "group limit exceeded: {running:?}");
        for job in running {
            h.complete(&dag_id, &job);
        }
        h.drain().await?;
        for action in deferred {
            h.process(&action).await?;
        }
    }

    assert!(h.dag(&dag_id).is_none());
    assert_eq!(
        sorted(h.executor.submitted_jobs()),
        vec!["D1", "D2", "D3", "D4", "D5", "D6"],
        "every job submitted exactly once"
    );
    assert_eq!(h.store.running_for_flow_group("group0")?, 0);
    Ok(())
}

#[tokio::test]
async fn failed_job_releases_its_quota() -> TestResult {
    init_tracing();
    let mut h = ProcHarness::with_quota(QuotaLimits::unlimited().with_user_limit("tester", 1));
    let dag_id = h.register(DagBuilder::new("group0", "solo", 3).job("only", &[]).build());

    h.launch(&dag_id).await?;
    assert_eq!(h.store.running_for_user("tester")?, 1);

    h.fail(&dag_id, "only");
    h.drain().await?;

    assert!(h.dag(&dag_id).is_none());
    assert_eq!(h.store.running_for_user("tester")?, 0);
    Ok(())
}
