// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, EngineSection, FlowConfig, FlowDefinition, RawConfigFile};
use crate::engine::EngineOptions;
use crate::errors::{FlowdagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_flows(&raw)?;
        let engine = engine_options(&raw.config)?;

        let mut flows = BTreeMap::new();
        for (name, flow) in raw.flow {
            validate_flow(&name, &flow)?;
            let definition = flow_definition(name.clone(), flow)?;
            flows.insert(name, definition);
        }

        Ok(ConfigFile::new_unchecked(engine, raw.quota.into(), flows))
    }
}

fn ensure_has_flows(cfg: &RawConfigFile) -> Result<()> {
    if cfg.flow.is_empty() {
        return Err(FlowdagError::ConfigError(
            "config must contain at least one [flow.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| FlowdagError::ConfigError(format!("[{section}].{key}: {e}")))
}

fn engine_options(section: &EngineSection) -> Result<EngineOptions> {
    if section.num_threads == 0 {
        return Err(FlowdagError::ConfigError(
            "[config].num_threads must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.max_dispatch_attempts == 0 {
        return Err(FlowdagError::ConfigError(
            "[config].max_dispatch_attempts must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(EngineOptions {
        num_threads: section.num_threads,
        multi_active_scheduler_enabled: section.multi_active_scheduler_enabled,
        reminder_delay: duration_field("config", "reminder_delay", &section.reminder_delay)?,
        quota_retry_delay: duration_field(
            "config",
            "quota_retry_delay",
            &section.quota_retry_delay,
        )?,
        max_dispatch_attempts: section.max_dispatch_attempts,
        dispatch_retry_backoff: duration_field(
            "config",
            "dispatch_retry_backoff",
            &section.dispatch_retry_backoff,
        )?,
        transient_retry_attempts: section.transient_retry_attempts,
    })
}

fn validate_flow(name: &str, flow: &FlowConfig) -> Result<()> {
    if flow.group.trim().is_empty() {
        return Err(FlowdagError::ConfigError(format!(
            "flow '{name}' must set a non-empty `group`"
        )));
    }
    if flow.proxy_user.trim().is_empty() {
        return Err(FlowdagError::ConfigError(format!(
            "flow '{name}' must set a non-empty `proxy_user`"
        )));
    }
    if flow.job.is_empty() {
        return Err(FlowdagError::ConfigError(format!(
            "flow '{name}' must contain at least one [flow.{name}.job.<job>] section"
        )));
    }

    for (job_name, job) in flow.job.iter() {
        for dep in job.after.iter() {
            if dep == job_name {
                return Err(FlowdagError::ConfigError(format!(
                    "job '{name}.{job_name}' cannot depend on itself in `after`"
                )));
            }
            if !flow.job.contains_key(dep) {
                return Err(FlowdagError::ConfigError(format!(
                    "job '{name}.{job_name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }

    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for job_name in flow.job.keys() {
        graph.add_node(job_name.as_str());
    }
    for (job_name, job) in flow.job.iter() {
        for dep in job.after.iter() {
            graph.add_edge(dep.as_str(), job_name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FlowdagError::DagCycle(format!(
            "cycle detected in flow '{name}' involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn flow_definition(name: String, flow: FlowConfig) -> Result<FlowDefinition> {
    let max_duration = match flow.max_duration.as_deref() {
        Some(raw) => Some(duration_field(
            &format!("flow.{name}"),
            "max_duration",
            raw,
        )?),
        None => None,
    };

    Ok(FlowDefinition {
        name,
        group: flow.group,
        proxy_user: flow.proxy_user,
        failure_option: flow.failure_option,
        max_duration,
        executor: flow.executor,
        jobs: flow.job,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn defaults_apply_when_config_section_is_missing() {
        let cfg = parse(
            r#"
            [flow.daily]
            group = "etl"
            proxy_user = "alice"
            [flow.daily.job.a]
            cmd = "true"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine, EngineOptions::default());
        let flow = cfg.flow("etl", "daily").unwrap();
        assert_eq!(flow.executor, "local");
        assert!(flow.max_duration.is_none());
        assert!(cfg.flow("other", "daily").is_none());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = parse(
            r#"
            [config]
            num_threads = 0
            [flow.f]
            group = "g"
            proxy_user = "u"
            [flow.f.job.a]
            cmd = "true"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowdagError::ConfigError(_)));
    }

    #[test]
    fn cycles_are_reported_as_dag_cycles() {
        let err = parse(
            r#"
            [flow.f]
            group = "g"
            proxy_user = "u"
            [flow.f.job.a]
            cmd = "true"
            after = ["b"]
            [flow.f.job.b]
            cmd = "true"
            after = ["a"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowdagError::DagCycle(_)));
    }

    #[test]
    fn bad_durations_are_config_errors() {
        let err = parse(
            r#"
            [flow.f]
            group = "g"
            proxy_user = "u"
            max_duration = "soon"
            [flow.f.job.a]
            cmd = "true"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowdagError::ConfigError(_)));
    }
}
