// src/dag/mod.rs

//! Dag model and pure scheduling decisions.
//!
//! - [`model`] holds identities (`DagId`, `DagNodeId`) and the per-job
//!   entities (`JobSpec`, `JobExecutionPlan`, `DagNode`).
//! - [`graph`] holds the validated [`Dag`] and its readiness queries.
//! - [`scheduler_step`] decides what a Dag needs after a node finishes.

pub mod graph;
pub mod model;
pub mod scheduler_step;

pub use graph::Dag;
pub use model::{DagId, DagNode, DagNodeId, FlowFailure, JobExecutionPlan, JobName, JobSpec};
pub use scheduler_step::{FailurePlan, NextStep, failure_plan, next_step};
