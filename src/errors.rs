// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::DagId;

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Invalid DAG: {0}")]
    InvalidDag(String),

    #[error("Dag already exists: {0}")]
    DuplicateDag(DagId),

    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("Executor error: {0}")]
    ExecutorError(String),

    /// Lock contention, poisoned locks, lost connectivity. Safe to retry.
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowdagError {
    /// Whether the failed operation may simply be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowdagError::Transient(_))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        FlowdagError::Transient(format!("{what} lock poisoned"))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FlowdagError::Transient("busy".into()).is_retryable());
        assert!(!FlowdagError::ConfigError("bad".into()).is_retryable());
        assert!(!FlowdagError::ExecutorError("down".into()).is_retryable());
    }
}
