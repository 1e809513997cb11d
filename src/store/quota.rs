// src/store/quota.rs

//! Concurrency admission control keyed by proxy user and flow group.
//!
//! Holdings are tracked per node identity, so acquiring twice for the same
//! node (redelivered action, racing replica) counts once, and releasing a node
//! that holds nothing is a no-op.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::dag::{DagId, DagNode, DagNodeId};

/// Configured limits. A missing entry falls back to the default limit; a
/// missing default means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaLimits {
    pub per_user: HashMap<String, usize>,
    pub per_flow_group: HashMap<String, usize>,
    pub default_user_limit: Option<usize>,
    pub default_flow_group_limit: Option<usize>,
}

impl QuotaLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_user_limit(mut self, user: impl Into<String>, limit: usize) -> Self {
        self.per_user.insert(user.into(), limit);
        self
    }

    pub fn with_flow_group_limit(mut self, group: impl Into<String>, limit: usize) -> Self {
        self.per_flow_group.insert(group.into(), limit);
        self
    }

    pub fn user_limit(&self, user: &str) -> Option<usize> {
        self.per_user
            .get(user)
            .copied()
            .or(self.default_user_limit)
    }

    pub fn flow_group_limit(&self, group: &str) -> Option<usize> {
        self.per_flow_group
            .get(group)
            .copied()
            .or(self.default_flow_group_limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Granted,
    Denied { reason: String },
}

impl QuotaDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, QuotaDecision::Granted)
    }
}

#[derive(Debug, Default)]
pub struct QuotaGate {
    limits: QuotaLimits,
    by_user: HashMap<String, HashSet<DagNodeId>>,
    by_flow_group: HashMap<String, HashSet<DagNodeId>>,
}

impl QuotaGate {
    pub fn new(limits: QuotaLimits) -> Self {
        Self {
            limits,
            by_user: HashMap::new(),
            by_flow_group: HashMap::new(),
        }
    }

    pub fn running_for_user(&self, user: &str) -> usize {
        self.by_user.get(user).map_or(0, HashSet::len)
    }

    pub fn running_for_flow_group(&self, group: &str) -> usize {
        self.by_flow_group.get(group).map_or(0, HashSet::len)
    }

    fn holds(&self, node: &DagNode, id: &DagNodeId) -> bool {
        self.by_user
            .get(&node.plan.proxy_user)
            .is_some_and(|held| held.contains(id))
    }

    /// Acquire a slot for every node, or for none of them.
    pub fn try_acquire(&mut self, nodes: &[DagNode]) -> QuotaDecision {
        let mut user_extra: HashMap<&str, usize> = HashMap::new();
        let mut group_extra: HashMap<&str, usize> = HashMap::new();
        let mut to_add: Vec<(&DagNode, DagNodeId)> = Vec::new();

        for node in nodes {
            let id = node.node_id();
            if self.holds(node, &id) {
                continue;
            }
            *user_extra.entry(node.plan.proxy_user.as_str()).or_default() += 1;
            *group_extra
                .entry(node.plan.dag_id.flow_group.as_str())
                .or_default() += 1;
            to_add.push((node, id));
        }

        for (user, extra) in &user_extra {
            if let Some(limit) = self.limits.user_limit(user) {
                let held = self.running_for_user(user);
                if held.saturating_add(*extra) > limit {
                    return QuotaDecision::Denied {
                        reason: format!(
                            "proxy user '{user}' has {held} running job(s); limit is {limit}"
                        ),
                    };
                }
            }
        }

        for (group, extra) in &group_extra {
            if let Some(limit) = self.limits.flow_group_limit(group) {
                let held = self.running_for_flow_group(group);
                if held.saturating_add(*extra) > limit {
                    return QuotaDecision::Denied {
                        reason: format!(
                            "flow group '{group}' has {held} running job(s); limit is {limit}"
                        ),
                    };
                }
            }
        }

        for (node, id) in to_add {
            debug!(job = %id, user = %node.plan.proxy_user, "quota acquired");
            self.by_user
                .entry(node.plan.proxy_user.clone())
                .or_default()
                .insert(id.clone());
            self.by_flow_group
                .entry(id.dag_id.flow_group.clone())
                .or_default()
                .insert(id);
        }

        QuotaDecision::Granted
    }

    /// Give back the slot held by `node`, if any.
    pub fn release(&mut self, node: &DagNode) -> bool {
        let id = node.node_id();
        let by_user = self
            .by_user
            .get_mut(&node.plan.proxy_user)
            .is_some_and(|held| held.remove(&id));
        let by_group = self
            .by_flow_group
            .get_mut(&id.dag_id.flow_group)
            .is_some_and(|held| held.remove(&id));
        if by_user || by_group {
            debug!(job = %id, "quota released");
        }
        by_user || by_group
    }

    /// Give back every slot held by nodes of one flow execution.
    pub fn release_dag(&mut self, dag_id: &DagId) -> usize {
        let mut released = 0usize;
        for held in self.by_user.values_mut() {
            let before = held.len();
            held.retain(|id| &id.dag_id != dag_id);
            released = released.saturating_add(before.saturating_sub(held.len()));
        }
        for held in self.by_flow_group.values_mut() {
            held.retain(|id| &id.dag_id != dag_id);
        }
        released
    }
}
