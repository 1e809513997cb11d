use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution status of a single job within a Dag.
///
/// Transitions only move forward:
/// `Pending -> Running -> {Complete, Failed, Cancelled}`, plus
/// `Pending -> {Failed, Cancelled}` for nodes that never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Complete | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Staying in the same state is *not* a transition.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Complete | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Complete => "COMPLETE",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Per-flow policy deciding what a FAILED node does to the rest of its Dag.
///
/// - `FinishRunning`: start nothing new; let running jobs finish and cancel
///   everything still pending (default).
/// - `Cancel`: cancel running jobs through their executors and cancel
///   everything still pending.
/// - `FinishAllPossible`: only the failed node's descendants are cancelled;
///   independent branches keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOption {
    #[default]
    FinishRunning,
    Cancel,
    FinishAllPossible,
}

impl FromStr for FailureOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "finish_running" => Ok(FailureOption::FinishRunning),
            "cancel" => Ok(FailureOption::Cancel),
            "finish_all_possible" => Ok(FailureOption::FinishAllPossible),
            other => Err(format!(
                "invalid failure_option: {other} (expected \"finish_running\", \"cancel\" or \"finish_all_possible\")"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Complete));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Complete), "a job never claimed cannot complete");
        assert!(!Running.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Complete));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn failure_option_parses_config_spellings() {
        assert_eq!("cancel".parse(), Ok(FailureOption::Cancel));
        assert_eq!(
            "FINISH_ALL_POSSIBLE".parse(),
            Ok(FailureOption::FinishAllPossible)
        );
        assert_eq!("finish-running".parse(), Ok(FailureOption::FinishRunning));
        assert!("explode".parse::<FailureOption>().is_err());
    }
}
