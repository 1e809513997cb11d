// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`backend`] defines the [`JobExecutor`] trait, the name-keyed
//!   [`ExecutorRegistry`] and the [`CompletionReporter`] executors use to
//!   report finished jobs.
//! - [`process`] runs job commands as local processes.

pub mod backend;
pub mod process;

pub use backend::{BoxFuture, CompletionReporter, ExecutorRegistry, JobExecutor};
pub use process::ProcessExecutor;
