// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::EngineOptions;
use crate::store::QuotaLimits;
use crate::types::FailureOption;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// num_threads = 5
/// reminder_delay = "30s"
///
/// [quota.user]
/// alice = 2
///
/// [flow.daily]
/// group = "etl"
/// proxy_user = "alice"
/// max_duration = "2h"
///
/// [flow.daily.job.extract]
/// cmd = "echo extract"
///
/// [flow.daily.job.load]
/// cmd = "echo load"
/// after = ["extract"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: EngineSection,

    #[serde(default)]
    pub quota: QuotaSection,

    /// Flows keyed by flow name.
    #[serde(default)]
    pub flow: BTreeMap<String, FlowConfig>,
}

/// `[config]` section. Durations stay strings until validation.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    #[serde(default)]
    pub multi_active_scheduler_enabled: bool,

    #[serde(default = "default_reminder_delay")]
    pub reminder_delay: String,

    #[serde(default = "default_quota_retry_delay")]
    pub quota_retry_delay: String,

    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,

    #[serde(default = "default_dispatch_retry_backoff")]
    pub dispatch_retry_backoff: String,

    #[serde(default = "default_transient_retry_attempts")]
    pub transient_retry_attempts: u32,
}

fn default_num_threads() -> usize {
    5
}

fn default_reminder_delay() -> String {
    "30s".to_string()
}

fn default_quota_retry_delay() -> String {
    "10s".to_string()
}

fn default_max_dispatch_attempts() -> u32 {
    3
}

fn default_dispatch_retry_backoff() -> String {
    "500ms".to_string()
}

fn default_transient_retry_attempts() -> u32 {
    3
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
            multi_active_scheduler_enabled: false,
            reminder_delay: default_reminder_delay(),
            quota_retry_delay: default_quota_retry_delay(),
            max_dispatch_attempts: default_max_dispatch_attempts(),
            dispatch_retry_backoff: default_dispatch_retry_backoff(),
            transient_retry_attempts: default_transient_retry_attempts(),
        }
    }
}

/// `[quota]` section with optional `[quota.user]` / `[quota.flow_group]`
/// tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaSection {
    #[serde(default)]
    pub default_user_limit: Option<usize>,

    #[serde(default)]
    pub default_flow_group_limit: Option<usize>,

    #[serde(default)]
    pub user: BTreeMap<String, usize>,

    #[serde(default)]
    pub flow_group: BTreeMap<String, usize>,
}

impl From<QuotaSection> for QuotaLimits {
    fn from(section: QuotaSection) -> Self {
        QuotaLimits {
            per_user: section.user.into_iter().collect(),
            per_flow_group: section.flow_group.into_iter().collect(),
            default_user_limit: section.default_user_limit,
            default_flow_group_limit: section.default_flow_group_limit,
        }
    }
}

/// `[flow.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub group: String,

    pub proxy_user: String,

    #[serde(default)]
    pub failure_option: FailureOption,

    /// Optional deadline for the whole flow execution, e.g. `"2h"`.
    #[serde(default)]
    pub max_duration: Option<String>,

    /// Executor used by jobs that do not name their own.
    #[serde(default = "default_executor")]
    pub executor: String,

    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

pub fn default_executor() -> String {
    "local".to_string()
}

/// `[flow.<name>.job.<job>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub cmd: String,

    /// Jobs of the same flow this one waits for.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineOptions,
    pub quota: QuotaLimits,
    flows: BTreeMap<String, FlowDefinition>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        engine: EngineOptions,
        quota: QuotaLimits,
        flows: BTreeMap<String, FlowDefinition>,
    ) -> Self {
        Self {
            engine,
            quota,
            flows,
        }
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowDefinition> {
        self.flows.values()
    }

    /// Look a flow up by its group and name.
    pub fn flow(&self, group: &str, name: &str) -> Option<&FlowDefinition> {
        self.flows
            .get(name)
            .filter(|flow| flow.group == group)
    }
}

/// One validated flow.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub name: String,
    pub group: String,
    pub proxy_user: String,
    pub failure_option: FailureOption,
    pub max_duration: Option<Duration>,
    pub executor: String,
    pub jobs: BTreeMap<String, JobConfig>,
}

impl FlowDefinition {
    /// Executor a job runs on: its own, or the flow default.
    pub fn executor_for<'a>(&'a self, job: &'a JobConfig) -> &'a str {
        job.executor.as_deref().unwrap_or(&self.executor)
    }
}
