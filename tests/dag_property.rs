// tests/dag_property.rs

use std::collections::HashSet;

use proptest::prelude::*;

use flowdag::types::ExecutionStatus;
use flowdag_test_utils::ProcHarness;
use flowdag_test_utils::builders::DagBuilder;

// Acyclic by construction: job N may only depend on jobs 0..N-1.
fn dag_strategy(max_jobs: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_jobs).prop_flat_map(|num_jobs| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_jobs),
            num_jobs,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let deps: HashSet<usize> = if i == 0 {
                        HashSet::new()
                    } else {
                        deps.into_iter().map(|d| d % i).collect()
                    };
                    let mut deps: Vec<usize> = deps.into_iter().collect();
                    deps.sort_unstable();
                    deps
                })
                .collect()
        })
    })
}

fn build(execution_id: i64, deps: &[Vec<usize>]) -> DagBuilder {
    deps.iter()
        .enumerate()
        .fold(DagBuilder::new("prop", "random", execution_id), |b, (i, deps)| {
            let names: Vec<String> = deps.iter().map(|d| format!("job_{d}")).collect();
            let refs: Vec<&str> = names.iter().map(String::as_str).collect();
            b.job(&format!("job_{i}"), &refs)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_job_runs_at_most_once_and_the_flow_terminates(
        deps in dag_strategy(8),
        failing in proptest::collection::hash_set(0..8usize, 0..3),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let mut h = ProcHarness::new();
            let dag_id = h.register(build(1, &deps).build());
            h.launch(&dag_id).await.unwrap();

            // Report every running job, failing the chosen ones, until the
            // flow is gone.
            for _ in 0..(deps.len() * 2 + 2) {
                let Some(dag) = h.dag(&dag_id) else { break };
                for job in dag.jobs_in(ExecutionStatus::Running) {
                    let index: usize = job.trim_start_matches("job_").parse().unwrap();
                    if failing.contains(&index) {
                        h.fail(&dag_id, &job);
                    } else {
                        h.complete(&dag_id, &job);
                    }
                }
                h.drain().await.unwrap();
            }

            prop_assert!(h.dag(&dag_id).is_none(), "flow did not terminate");
            prop_assert_eq!(h.flow_events().len(), 1);

            let submitted = h.executor.submitted_jobs();
            let unique: HashSet<&String> = submitted.iter().collect();
            prop_assert_eq!(unique.len(), submitted.len(), "a job was submitted twice");
            if failing.iter().all(|i| *i >= deps.len()) {
                prop_assert_eq!(submitted.len(), deps.len(), "successful flow runs every job");
            }
            Ok(())
        })?;
    }
}
