// src/compiler.rs

//! Turning a LAUNCH request into a concrete Dag.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::DagAction;
use crate::config::{ConfigFile, FlowDefinition};
use crate::dag::{Dag, DagId, DagNode, JobExecutionPlan, JobSpec};
use crate::errors::Result;

/// Produces the job graph for a flow execution.
///
/// `Ok(None)` means the flow is unknown or does not compile into a valid
/// Dag; the launch then fails terminally. `Err` is reserved for failures of
/// the compiler itself.
pub trait FlowCompiler: Send + Sync {
    fn compile(&self, action: &DagAction) -> Result<Option<Dag>>;
}

/// Compiles flows declared in the `[flow.<name>]` sections of a config file.
pub struct ConfigFlowCompiler {
    config: Arc<ConfigFile>,
}

impl ConfigFlowCompiler {
    pub fn new(config: Arc<ConfigFile>) -> Self {
        Self { config }
    }
}

impl FlowCompiler for ConfigFlowCompiler {
    fn compile(&self, action: &DagAction) -> Result<Option<Dag>> {
        let Some(flow) = self.config.flow(&action.flow_group, &action.flow_name) else {
            warn!(action = %action, "no flow definition for launch request");
            return Ok(None);
        };

        let dag_id = action.dag_id();
        match Dag::new(dag_id.clone(), nodes_for(flow, &dag_id)) {
            Ok(dag) => {
                debug!(dag = %dag_id, jobs = dag.nodes().len(), "flow compiled");
                Ok(Some(dag.with_max_duration(flow.max_duration)))
            }
            Err(err) => {
                warn!(dag = %dag_id, error = %err, "flow does not compile into a valid dag");
                Ok(None)
            }
        }
    }
}

fn nodes_for(flow: &FlowDefinition, dag_id: &DagId) -> Vec<DagNode> {
    flow.jobs
        .iter()
        .map(|(name, job)| {
            let plan = JobExecutionPlan {
                dag_id: dag_id.clone(),
                job: JobSpec {
                    name: name.clone(),
                    command: job.cmd.clone(),
                    properties: job.properties.clone(),
                },
                executor: flow.executor_for(job).to_string(),
                proxy_user: flow.proxy_user.clone(),
                failure_option: flow.failure_option,
            };
            DagNode::new(plan, job.after.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DagActionType;
    use crate::config::RawConfigFile;
    use crate::types::FailureOption;

    fn compiler() -> ConfigFlowCompiler {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [flow.daily]
            group = "etl"
            proxy_user = "alice"
            failure_option = "cancel"
            max_duration = "1h"
            [flow.daily.job.extract]
            cmd = "echo extract"
            [flow.daily.job.load]
            cmd = "echo load"
            after = ["extract"]
            executor = "remote"
            "#,
        )
        .unwrap();
        ConfigFlowCompiler::new(Arc::new(ConfigFile::try_from(raw).unwrap()))
    }

    #[test]
    fn compiles_known_flow_into_dag() {
        let action = DagAction::flow(&DagId::new("etl", "daily", 42), DagActionType::Launch);
        let dag = compiler().compile(&action).unwrap().unwrap();

        assert_eq!(dag.id(), &DagId::new("etl", "daily", 42));
        assert_eq!(dag.max_duration(), Some(std::time::Duration::from_secs(3600)));
        assert_eq!(dag.failure_option(), FailureOption::Cancel);

        let load = dag.node("load").unwrap();
        assert_eq!(load.dependencies, vec!["extract".to_string()]);
        assert_eq!(load.plan.executor, "remote");
        assert_eq!(dag.node("extract").unwrap().plan.executor, "local");
    }

    #[test]
    fn unknown_flow_compiles_to_nothing() {
        let action = DagAction::flow(&DagId::new("etl", "weekly", 1), DagActionType::Launch);
        assert!(compiler().compile(&action).unwrap().is_none());

        let wrong_group = DagAction::flow(&DagId::new("ml", "daily", 1), DagActionType::Launch);
        assert!(compiler().compile(&wrong_group).unwrap().is_none());
    }
}
