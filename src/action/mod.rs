// src/action/mod.rs

//! DagActions and the action log they live in until processed.

pub mod log;
pub mod model;

pub use log::{ActionChange, ActionLog, ChangeKind, InMemoryActionLog};
pub use model::{DagAction, DagActionType};
