// src/lib.rs

pub mod action;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod proc;
pub mod store;
pub mod types;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Result, anyhow};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::action::{ActionLog, DagAction, DagActionType, InMemoryActionLog};
use crate::cli::CliArgs;
use crate::compiler::ConfigFlowCompiler;
use crate::config::{ConfigFile, load_and_validate};
use crate::dag::DagId;
use crate::engine::{Engine, FlowEvent, FlowOutcome};
use crate::exec::{CompletionReporter, ExecutorRegistry, ProcessExecutor};
use crate::store::{DagStateStore, InMemoryDagStateStore, InMemoryStatusFeed};

/// Executor name the local process executor is registered under.
pub const LOCAL_EXECUTOR: &str = "local";

/// High-level entry point used by `main.rs`.
///
/// Wires the in-memory action log and state store, the config-backed flow
/// compiler and the local process executor into an [`Engine`], submits one
/// LAUNCH per `--launch` flag, and runs until Ctrl-C (or, with `--once`,
/// until every launched flow has finished).
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = Arc::new(load_and_validate(&config_path)?);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let actions = Arc::new(InMemoryActionLog::new());
    let statuses = Arc::new(InMemoryStatusFeed::new());
    let store = Arc::new(InMemoryDagStateStore::new(
        actions.clone(),
        statuses.clone(),
        cfg.quota.clone(),
    ));

    let reporter = CompletionReporter::new(statuses, actions.clone());
    let executors =
        ExecutorRegistry::new().with(LOCAL_EXECUTOR, Arc::new(ProcessExecutor::new(reporter)));
    ensure_executors_registered(&cfg, &executors)?;

    let engine = Engine::new(
        cfg.engine.clone(),
        store.clone(),
        actions.clone(),
        Arc::new(ConfigFlowCompiler::new(cfg.clone())),
        executors,
    );
    let mut events = engine.subscribe_flow_events();
    let handle = engine.start();

    let base_id = execution_id_now();
    let mut waiting: HashSet<DagId> = HashSet::new();
    for (offset, flow) in (0_i64..).zip(args.launch.iter()) {
        let dag_id = DagId::new(&flow.group, &flow.name, base_id.saturating_add(offset));
        actions.add(&DagAction::flow(&dag_id, DagActionType::Launch))?;
        info!(dag = %dag_id, "launch requested");
        waiting.insert(dag_id);
    }

    let mut unsuccessful = 0usize;
    if args.once && waiting.is_empty() {
        info!("--once without --launch; nothing to do");
    } else {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                res = &mut ctrl_c => {
                    if let Err(e) = res {
                        warn!(error = %e, "failed to listen for Ctrl+C");
                    }
                    info!("Ctrl+C received; shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if !report_flow_event(&event) {
                            unsuccessful += 1;
                        }
                        waiting.remove(&event.dag_id);
                        if args.once && waiting.is_empty() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "missed flow events");
                        let settled =
                            settle_unreported(&mut waiting, store.as_ref(), actions.as_ref())?;
                        // Their outcome was in the events we missed.
                        unsuccessful += settled;
                        if args.once && waiting.is_empty() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    handle.shutdown().await?;

    if args.once && unsuccessful > 0 {
        return Err(anyhow!("{unsuccessful} flow(s) did not succeed"));
    }
    Ok(())
}

fn execution_id_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

fn ensure_executors_registered(cfg: &ConfigFile, executors: &ExecutorRegistry) -> Result<()> {
    for flow in cfg.flows() {
        for (job_name, job) in flow.jobs.iter() {
            let executor = flow.executor_for(job);
            if !executors.contains(executor) {
                return Err(anyhow!(
                    "job '{}.{}' uses unknown executor '{}'",
                    flow.name,
                    job_name,
                    executor
                ));
            }
        }
    }
    Ok(())
}

/// Stop waiting for flows that are neither queued for launch nor live any
/// more. Returns how many were dropped.
fn settle_unreported(
    waiting: &mut HashSet<DagId>,
    store: &dyn DagStateStore,
    actions: &dyn ActionLog,
) -> errors::Result<usize> {
    let mut finished = Vec::new();
    for dag_id in waiting.iter() {
        let queued = actions.exists(&DagAction::flow(dag_id, DagActionType::Launch))?;
        if !queued && store.get_dag(dag_id)?.is_none() {
            warn!(dag = %dag_id, "flow finished while its event was missed");
            finished.push(dag_id.clone());
        }
    }
    for dag_id in &finished {
        waiting.remove(dag_id);
    }
    Ok(finished.len())
}

/// Log a flow outcome; `true` when the flow succeeded.
fn report_flow_event(event: &FlowEvent) -> bool {
    match &event.outcome {
        FlowOutcome::Succeeded => {
            info!(dag = %event.dag_id, "flow succeeded");
            true
        }
        FlowOutcome::Failed { failed_jobs } => {
            warn!(dag = %event.dag_id, ?failed_jobs, "flow failed");
            false
        }
        other => {
            warn!(dag = %event.dag_id, outcome = ?other, "flow did not complete");
            false
        }
    }
}

/// Simple dry-run output: print engine options, quotas and flows.
fn print_dry_run(cfg: &ConfigFile) {
    println!("flowdag dry-run");
    println!("  config.num_threads = {}", cfg.engine.num_threads);
    println!(
        "  config.multi_active_scheduler_enabled = {}",
        cfg.engine.multi_active_scheduler_enabled
    );
    println!("  config.reminder_delay = {:?}", cfg.engine.reminder_delay);
    println!("  config.quota_retry_delay = {:?}", cfg.engine.quota_retry_delay);
    if !cfg.quota.per_user.is_empty() {
        println!("  quota.user = {:?}", cfg.quota.per_user);
    }
    if !cfg.quota.per_flow_group.is_empty() {
        println!("  quota.flow_group = {:?}", cfg.quota.per_flow_group);
    }
    println!();

    for flow in cfg.flows() {
        println!("flow {}/{} (user {})", flow.group, flow.name, flow.proxy_user);
        println!("    failure_option: {:?}", flow.failure_option);
        if let Some(max) = flow.max_duration {
            println!("    max_duration: {max:?}");
        }
        for (name, job) in flow.jobs.iter() {
            println!("  - {name}");
            println!("      cmd: {}", job.cmd);
            println!("      executor: {}", flow.executor_for(job));
            if !job.after.is_empty() {
                println!("      after: {:?}", job.after);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Dag, DagNode, JobExecutionPlan, JobSpec};
    use crate::store::QuotaLimits;
    use crate::types::FailureOption;

    fn one_job_dag(id: &DagId) -> Dag {
        let node = DagNode::new(
            JobExecutionPlan {
                dag_id: id.clone(),
                job: JobSpec {
                    name: "only".into(),
                    command: "true".into(),
                    properties: Default::default(),
                },
                executor: LOCAL_EXECUTOR.into(),
                proxy_user: "tester".into(),
                failure_option: FailureOption::FinishRunning,
            },
            Vec::new(),
        );
        Dag::new(id.clone(), vec![node]).unwrap()
    }

    #[test]
    fn settle_drops_only_flows_that_are_gone() {
        let actions = Arc::new(InMemoryActionLog::new());
        let store = InMemoryDagStateStore::new(
            actions.clone(),
            Arc::new(InMemoryStatusFeed::new()),
            QuotaLimits::unlimited(),
        );
        let queued = DagId::new("g", "f", 1);
        let live = DagId::new("g", "f", 2);
        let gone = DagId::new("g", "f", 3);
        actions
            .add(&DagAction::flow(&queued, DagActionType::Launch))
            .unwrap();
        store.add_dag(&one_job_dag(&live)).unwrap();

        let mut waiting: HashSet<DagId> = [queued.clone(), live.clone(), gone].into();
        let settled = settle_unreported(&mut waiting, &store, actions.as_ref()).unwrap();

        assert_eq!(settled, 1);
        assert_eq!(waiting, [queued, live].into());
    }
}
