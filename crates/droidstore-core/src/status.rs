//! Status enums for Runs and Tasks, and the task result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Stage of execution of a Run.
///
/// The lifecycle is monotonic: generic updates may only keep the current
/// status or move forward. `restart` is the one operation allowed to reset
/// a run to `Scheduling`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run row committed, supervising job not yet requested.
    #[default]
    Initialized,
    /// Supervising job requested from the orchestrator.
    Scheduling,
    /// Droids are claiming and executing tasks.
    Running,
    /// All tasks accounted for.
    Completed,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Initialized => 0,
            Self::Scheduling => 1,
            Self::Running => 2,
            Self::Completed => 3,
        }
    }

    /// Returns true if a generic update may move the status to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        self.rank() <= next.rank()
    }

    /// Canonical wire/storage form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::Scheduling => "Scheduling",
            Self::Running => "Running",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initialized" => Ok(Self::Initialized),
            "Scheduling" => Ok(Self::Scheduling),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            other => Err(CoreError::UnknownEnum {
                kind: "run status",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a Task. Governs checkout eligibility: only `initialized`
/// tasks can be claimed, and checkout moves them to `scheduled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task created, eligible for checkout.
    #[default]
    Initialized,
    /// Task claimed by exactly one droid.
    Scheduled,
    /// Droid reported a result.
    Completed,
    /// Task excluded from execution.
    Ignored,
}

impl TaskStatus {
    /// Canonical wire/storage form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "ignored" => Ok(Self::Ignored),
            other => Err(CoreError::UnknownEnum {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome reported by the droid after executing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    /// The test passed.
    Passed,
    /// The test failed.
    Failed,
    /// The harness itself errored before a verdict.
    Error,
}

impl TaskResult {
    /// Canonical wire/storage form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskResult {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            other => Err(CoreError::UnknownEnum {
                kind: "task result",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_is_forward_only() {
        assert!(RunStatus::Initialized.can_advance_to(RunStatus::Scheduling));
        assert!(RunStatus::Scheduling.can_advance_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_advance_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_advance_to(RunStatus::Running));
        assert!(!RunStatus::Running.can_advance_to(RunStatus::Initialized));
    }

    #[test]
    fn wire_forms_round_trip() {
        for status in [
            RunStatus::Initialized,
            RunStatus::Scheduling,
            RunStatus::Running,
            RunStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!("scheduled".parse::<TaskStatus>().unwrap(), TaskStatus::Scheduled);
        assert_eq!("passed".parse::<TaskResult>().unwrap(), TaskResult::Passed);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Initialized).unwrap(),
            "\"initialized\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Scheduling).unwrap(),
            "\"Scheduling\""
        );
    }
}
